//! Deferred destruction of GPU resources
//!
//! Resources are wrapped in [`Owned`] handles. Dropping one does not touch the
//! backend directly; the handle is pushed onto a shared [`ReleaseQueue`] that
//! the backend drains at the start of the next frame.

use std::sync::Arc;

use parking_lot::Mutex;

use super::traits::{BufferHandle, FramebufferHandle, ProgramHandle, TextureHandle};

/// Any resource a backend can destroy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    Framebuffer(FramebufferHandle),
    Program(ProgramHandle),
}

impl From<BufferHandle> for ResourceId {
    fn from(handle: BufferHandle) -> Self {
        ResourceId::Buffer(handle)
    }
}

impl From<TextureHandle> for ResourceId {
    fn from(handle: TextureHandle) -> Self {
        ResourceId::Texture(handle)
    }
}

impl From<FramebufferHandle> for ResourceId {
    fn from(handle: FramebufferHandle) -> Self {
        ResourceId::Framebuffer(handle)
    }
}

impl From<ProgramHandle> for ResourceId {
    fn from(handle: ProgramHandle) -> Self {
        ResourceId::Program(handle)
    }
}

/// Shared list of resources waiting to be destroyed
#[derive(Debug, Clone, Default)]
pub struct ReleaseQueue {
    pending: Arc<Mutex<Vec<ResourceId>>>,
}

impl ReleaseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, resource: ResourceId) {
        self.pending.lock().push(resource);
    }

    /// Take everything queued so far, oldest first
    pub fn drain(&self) -> Vec<ResourceId> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wrap a freshly created handle so that dropping it schedules its release
    pub fn own<H>(&self, handle: H) -> Owned<H>
    where
        H: Copy + Into<ResourceId>,
    {
        Owned {
            handle,
            queue: self.clone(),
        }
    }
}

/// Exclusive owner of a backend resource
#[derive(Debug)]
pub struct Owned<H>
where
    H: Copy + Into<ResourceId>,
{
    handle: H,
    queue: ReleaseQueue,
}

impl<H> Owned<H>
where
    H: Copy + Into<ResourceId>,
{
    pub fn handle(&self) -> H {
        self.handle
    }
}

impl<H> Drop for Owned<H>
where
    H: Copy + Into<ResourceId>,
{
    fn drop(&mut self) {
        self.queue.push(self.handle.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_enqueues_release() {
        let queue = ReleaseQueue::new();
        let texture = queue.own(TextureHandle(7));
        let buffer = queue.own(BufferHandle(3));
        assert!(queue.is_empty());

        drop(texture);
        drop(buffer);

        assert_eq!(
            queue.drain(),
            vec![
                ResourceId::Texture(TextureHandle(7)),
                ResourceId::Buffer(BufferHandle(3))
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clones_share_pending_list() {
        let queue = ReleaseQueue::new();
        let other = queue.clone();
        drop(other.own(ProgramHandle(1)));
        assert_eq!(queue.len(), 1);
    }
}
