use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{RwLock, RwLockReadGuard};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AllocationError {
    #[error("frame size {width}x{height} is not representable")]
    Overflow { width: u32, height: u32 },

    #[error("frame size {width}x{height} is empty")]
    Empty { width: u32, height: u32 },

    #[error("could not allocate {bytes} bytes for frame buffers")]
    OutOfMemory { bytes: usize },
}

/// One RGBA frame plus the generation of the synthesis that filled it.
pub struct FrameBuffer {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    generation: u64,
}

impl FrameBuffer {
    pub fn allocate(width: u32, height: u32) -> Result<Self, AllocationError> {
        let bytes = frame_len(width, height)?;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(bytes)
            .map_err(|_| AllocationError::OutOfMemory { bytes })?;
        pixels.resize(bytes, 0);
        Ok(Self {
            pixels,
            width,
            height,
            generation: 0,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// 0 until the first completed synthesis lands in this buffer.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Byte length of an RGBA frame, checked for overflow.
pub fn frame_len(width: u32, height: u32) -> Result<usize, AllocationError> {
    if width == 0 || height == 0 {
        return Err(AllocationError::Empty { width, height });
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|px| px.checked_mul(4))
        .filter(|bytes| *bytes <= isize::MAX as usize)
        .ok_or(AllocationError::Overflow { width, height })
}

/// Read access to the buffer the display should show.
pub struct FrontFrame<'a> {
    guard: RwLockReadGuard<'a, FrameBuffer>,
}

impl Deref for FrontFrame<'_> {
    type Target = FrameBuffer;

    fn deref(&self) -> &FrameBuffer {
        &self.guard
    }
}

/// A/B frame buffers shared by the synthesizer and the display.
///
/// `front` is the only shared selector. The synthesizer writes into the other
/// buffer and flips `front` once the write is complete; the display reads
/// whichever buffer `front` names at the moment it looks. Each side only ever
/// locks its own buffer, so a read never observes a write in progress.
pub struct PresentationBuffers {
    buffers: [RwLock<FrameBuffer>; 2],
    front: AtomicUsize,
    generation: AtomicU64,
    ready_tx: Sender<u64>,
    ready_rx: Receiver<u64>,
    width: u32,
    height: u32,
}

impl PresentationBuffers {
    /// Allocate both buffers up front. Nothing is shared until this succeeds.
    pub fn allocate(width: u32, height: u32) -> Result<Self, AllocationError> {
        let a = FrameBuffer::allocate(width, height)?;
        let b = FrameBuffer::allocate(width, height)?;
        let (ready_tx, ready_rx) = bounded(1);
        log::debug!(
            "Allocated presentation buffers: 2 x {}x{} ({} bytes each)",
            width,
            height,
            a.pixels.len()
        );
        Ok(Self {
            buffers: [RwLock::new(a), RwLock::new(b)],
            front: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            ready_tx,
            ready_rx,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    /// Render into the back buffer and expose it if `render` succeeds.
    ///
    /// On error the flip is skipped, so the display keeps showing the
    /// previous frame. Must only be called from one thread at a time.
    pub fn render_back<E, F>(&self, render: F) -> Result<u64, E>
    where
        F: FnOnce(&mut [u8]) -> Result<(), E>,
    {
        let back = 1 - self.front.load(Ordering::Acquire);
        let mut buffer = self.buffers[back].write();
        render(&mut buffer.pixels)?;

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        buffer.generation = generation;
        drop(buffer);

        self.front.store(back, Ordering::Release);
        // A pending notification already wakes the display, which will read the newest front
        let _ = self.ready_tx.try_send(generation);
        Ok(generation)
    }

    /// Borrow the buffer currently marked for display.
    pub fn front(&self) -> FrontFrame<'_> {
        let index = self.front.load(Ordering::Acquire);
        FrontFrame {
            guard: self.buffers[index].read(),
        }
    }

    /// Copy the current front buffer into `frame` if it holds a newer
    /// generation. The read lock is held for the copy only, so a slow reader
    /// of `frame` never blocks `render_back`.
    pub fn copy_front(&self, frame: &mut FrameBuffer) -> bool {
        let front = self.front();
        if front.generation == frame.generation {
            return false;
        }
        frame.pixels.clone_from(&front.pixels);
        frame.width = front.width;
        frame.height = front.height;
        frame.generation = front.generation;
        true
    }

    /// Wait up to `timeout` for a newly exposed frame.
    pub fn wait_ready(&self, timeout: Duration) -> Option<u64> {
        match self.ready_rx.recv_timeout(timeout) {
            Ok(generation) => Some(generation),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Number of completed syntheses so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_allocation_checks() {
        assert!(matches!(
            PresentationBuffers::allocate(0, 10),
            Err(AllocationError::Empty { .. })
        ));
        assert_eq!(frame_len(720, 450).unwrap(), 720 * 450 * 4);
        assert!(matches!(
            PresentationBuffers::allocate(u32::MAX, u32::MAX),
            Err(AllocationError::Overflow { .. })
        ));
    }

    #[test]
    fn test_initial_front_is_blank() {
        let buffers = PresentationBuffers::allocate(4, 4).unwrap();
        let front = buffers.front();
        assert_eq!(front.generation(), 0);
        assert!(front.pixels().iter().all(|&b| b == 0));
        assert_eq!(buffers.wait_ready(Duration::from_millis(1)), None);
    }

    #[test]
    fn test_flip_exposes_completed_frame() {
        let buffers = PresentationBuffers::allocate(2, 2).unwrap();
        let generation = buffers
            .render_back(|px| -> Result<(), ()> {
                px.fill(9);
                Ok(())
            })
            .unwrap();
        assert_eq!(generation, 1);
        assert_eq!(buffers.wait_ready(Duration::from_millis(10)), Some(1));
        let front = buffers.front();
        assert_eq!(front.generation(), 1);
        assert!(front.pixels().iter().all(|&b| b == 9));
    }

    #[test]
    fn test_failed_render_keeps_previous_frame() {
        let buffers = PresentationBuffers::allocate(2, 2).unwrap();
        buffers
            .render_back(|px| -> Result<(), ()> {
                px.fill(5);
                Ok(())
            })
            .unwrap();
        let result = buffers.render_back(|_| Err("no input"));
        assert_eq!(result, Err("no input"));
        let front = buffers.front();
        assert_eq!(front.generation(), 1);
        assert!(front.pixels().iter().all(|&b| b == 5));
        assert_eq!(buffers.generation(), 1);
    }

    #[test]
    fn test_notifications_coalesce() {
        let buffers = PresentationBuffers::allocate(1, 1).unwrap();
        for _ in 0..3 {
            buffers.render_back(|_| -> Result<(), ()> { Ok(()) }).unwrap();
        }
        assert_eq!(buffers.wait_ready(Duration::from_millis(1)), Some(1));
        assert_eq!(buffers.wait_ready(Duration::from_millis(1)), None);
        assert_eq!(buffers.front().generation(), 3);
    }

    #[test]
    fn test_copied_frame_does_not_hold_a_buffer() {
        let buffers = PresentationBuffers::allocate(2, 2).unwrap();
        let mut shown = FrameBuffer::allocate(2, 2).unwrap();
        assert!(!buffers.copy_front(&mut shown));

        for fill in 1..=2u8 {
            buffers
                .render_back(|px| -> Result<(), ()> {
                    px.fill(fill);
                    Ok(())
                })
                .unwrap();
        }
        assert!(buffers.copy_front(&mut shown));
        assert!(!buffers.copy_front(&mut shown));
        assert_eq!(shown.generation(), 2);

        // Both buffers stay writable while the copy is alive
        for _ in 0..2 {
            buffers
                .render_back(|px| -> Result<(), ()> {
                    px.fill(0);
                    Ok(())
                })
                .unwrap();
        }
        assert!(shown.pixels().iter().all(|&b| b == 2));
        assert!(buffers.copy_front(&mut shown));
        assert_eq!(shown.generation(), 4);
    }

    #[test]
    fn test_display_never_sees_partial_frame() {
        let buffers = Arc::new(PresentationBuffers::allocate(64, 64).unwrap());
        let done = Arc::new(AtomicBool::new(false));

        let display = {
            let buffers = buffers.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut last = 0;
                let mut seen = 0;
                while !done.load(Ordering::Relaxed) {
                    let front = buffers.front();
                    let generation = front.generation();
                    let fill = (generation % 256) as u8;
                    assert!(front.pixels().iter().all(|&b| b == fill));
                    assert!(generation >= last);
                    if generation > last {
                        seen += 1;
                    }
                    last = generation;
                }
                seen
            })
        };

        for _ in 0..2_000 {
            buffers
                .render_back(|px| -> Result<(), ()> {
                    let fill = ((buffers.generation() + 1) % 256) as u8;
                    for chunk in px.chunks_mut(1024) {
                        chunk.fill(fill);
                        thread::yield_now();
                    }
                    Ok(())
                })
                .unwrap();
        }
        done.store(true, Ordering::Relaxed);
        assert!(display.join().unwrap() > 0);
        assert_eq!(buffers.front().generation(), 2_000);
    }
}
