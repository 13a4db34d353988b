//! Fixed-topology collection of channel handles.

use tracing::error;

use crate::driver::ChannelDriver;
use crate::error::RegistryError;

/// Ordered, append-only set of channels.
///
/// The registry borrows its drivers: whoever sets up the hardware owns the
/// driver values and must keep them alive for `'a`. Indices are assigned in
/// registration order and never change.
///
/// `D` defaults to a trait object so mixed driver types can share one
/// registry; a concrete `D` keeps the concrete type visible to callers.
pub struct ChannelRegistry<'a, D: ?Sized + ChannelDriver = dyn ChannelDriver + 'a> {
    channels: Vec<&'a mut D>,
    capacity: usize,
}

impl<'a, D: ?Sized + ChannelDriver> ChannelRegistry<'a, D> {
    pub fn new(capacity: usize) -> Result<Self, RegistryError> {
        if capacity == 0 {
            return Err(RegistryError::ZeroCapacity);
        }
        Ok(Self {
            channels: Vec::with_capacity(capacity),
            capacity,
        })
    }

    /// Appends a channel and returns its index.
    pub fn register(&mut self, channel: &'a mut D) -> Result<usize, RegistryError> {
        if self.channels.len() >= self.capacity {
            error!(capacity = self.capacity, "channel registry full, channel dropped");
            return Err(RegistryError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.channels.push(channel);
        Ok(self.channels.len() - 1)
    }

    pub fn count(&self) -> usize {
        self.channels.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Whether `index` addresses a registered channel.
    pub fn contains(&self, index: usize) -> bool {
        index < self.channels.len()
    }

    pub fn get(&self, index: usize) -> Option<&D> {
        self.channels.get(index).map(|c| &**c)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut D> {
        self.channels.get_mut(index).map(|c| &mut **c)
    }

    pub fn for_each_mut(&mut self, mut f: impl FnMut(usize, &mut D)) {
        for (index, channel) in self.channels.iter_mut().enumerate() {
            f(index, &mut **channel);
        }
    }
}
