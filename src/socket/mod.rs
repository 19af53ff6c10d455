/*!
    This module provides the trait [BusSocket] abstracting the physical medium carrying the fieldbus frames.

    The only production implementor is [EthernetSocket], a raw socket bound to
    one interface, which grants exclusive, jitter-free access to the segment.
    [crate::sim] provides an in-memory implementor backing the test suite and
    the demos.
*/

#[cfg(target_os = "linux")]
mod ethernet;
#[cfg(target_os = "linux")]
pub use ethernet::EthernetSocket;

use std::io;

/**
    trait implementing the frame encapsulation into some medium

    Implementors are responsible for assembling whole frames and hiding the
    details of medium-specific headers, footers, checks and padding.
*/
pub trait BusSocket: Send + Sync {
    /**
        receive one frame into the given buffer (starting from the frame header), returning the number of bytes read

        The call blocks, but only for a bounded time: when nothing arrives it
        must return a [io::ErrorKind::WouldBlock] or [io::ErrorKind::TimedOut]
        error so the reception loop can observe a shutdown request.
    */
    fn receive(&self, data: &mut [u8]) -> io::Result<usize>;

    /// send one frame contained in the given buffer, the whole buffer is sent
    fn send(&self, data: &[u8]) -> io::Result<()>;

    /// maximum frame size tolerated by this socket
    fn max_frame(&self) -> usize {crate::frame::MAX_FRAME}
}
