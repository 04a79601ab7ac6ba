use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum H265PictureType {
    // Intra picture, IDR pictures are I pictures with the IDR flag set
    I,
    // Uses previous pictures as reference
    P,
    // Uses previous and future pictures as reference, never used as reference itself
    B,
}

/// A frame assigned its position in the coded stream
#[derive(Debug)]
pub(crate) struct Picture<F> {
    /// Picture order count, modulo `MaxPicOrderCntLsb`
    pub(crate) poc: u32,
    pub(crate) picture_type: H265PictureType,
    pub(crate) is_idr: bool,
    pub(crate) frame: F,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReorderState {
    /// No B-Frames pending
    Idle,
    /// Collecting frames which will be coded as B-Frames after the next P-Frame
    WaitFrames,
    /// Emitting the queued pictures
    DumpFrames,
}

struct QueuedFrame<F> {
    poc: u32,
    /// `None` until the frame has been assigned a type
    picture_type: Option<H265PictureType>,
    is_idr: bool,
    frame: F,
}

impl<F> QueuedFrame<F> {
    fn into_picture(self) -> Picture<F> {
        let Some(picture_type) = self.picture_type else {
            unreachable!("emitting a picture without a picture type")
        };

        Picture {
            poc: self.poc,
            picture_type,
            is_idr: self.is_idr,
            frame: self.frame,
        }
    }
}

/// Turns frames in display order into pictures in encode order
pub(crate) struct ReorderPool<F> {
    queue: VecDeque<QueuedFrame<F>>,
    state: ReorderState,

    /// Position of the next frame inside the current IDR period
    frame_index: u32,
    /// Display order counter, POCs are derived from it
    present_index: u32,

    keyframe_period: u32,
    idr_period: u32,
    num_bframes: u32,
    max_poc: u32,
}

impl<F> ReorderPool<F> {
    pub(crate) fn new(keyframe_period: u32, idr_period: u32, num_bframes: u32, max_poc: u32) -> Self {
        assert!(keyframe_period > 0);
        assert!(idr_period >= keyframe_period);
        assert!(max_poc.is_power_of_two());

        Self {
            queue: VecDeque::with_capacity(num_bframes as usize + 1),
            state: ReorderState::Idle,
            frame_index: 0,
            present_index: 0,
            keyframe_period,
            idr_period,
            num_bframes,
            max_poc,
        }
    }

    /// Number of frames held back
    pub(crate) fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Submit the next frame in display order.
    ///
    /// Returns the next picture to encode, if there is one. More pictures may be ready afterwards, see [`ReorderPool::pop`].
    pub(crate) fn submit(&mut self, frame: F, force_keyframe: bool) -> Option<Picture<F>> {
        self.present_index = self.present_index.wrapping_add(1);

        let mut queued = QueuedFrame {
            poc: self.present_index % self.max_poc,
            picture_type: None,
            is_idr: false,
            frame,
        };

        let is_idr = self.frame_index == 0 || self.frame_index >= self.idr_period;

        if is_idr || force_keyframe || self.frame_index.is_multiple_of(self.keyframe_period) {
            self.frame_index += 1;

            if self.num_bframes > 0 && !self.queue.is_empty() {
                // Close the pending B-Frames with a P-Frame, the key picture follows them
                let mut p_frame = self.queue.pop_back()?;
                p_frame.picture_type = Some(H265PictureType::P);

                self.mark_queue_as_b_frames();
                self.set_key_frame(&mut queued, is_idr);
                self.queue.push_back(queued);
                self.state = ReorderState::DumpFrames;

                return Some(p_frame.into_picture());
            }

            self.set_key_frame(&mut queued, is_idr);
            assert!(self.queue.is_empty());

            if self.num_bframes > 0 {
                self.state = ReorderState::WaitFrames;
            }

            return Some(queued.into_picture());
        }

        self.frame_index += 1;

        if self.state == ReorderState::WaitFrames && self.queue.len() < self.num_bframes as usize {
            self.queue.push_back(queued);
            return None;
        }

        queued.picture_type = Some(H265PictureType::P);

        if self.state == ReorderState::WaitFrames {
            self.mark_queue_as_b_frames();
            self.state = ReorderState::DumpFrames;
        }

        Some(queued.into_picture())
    }

    /// Returns the next picture which is ready to be encoded without submitting a new frame
    pub(crate) fn pop(&mut self) -> Option<Picture<F>> {
        if self.state != ReorderState::DumpFrames {
            return None;
        }

        let queued = self.queue.pop_front()?;

        if self.queue.is_empty() {
            self.state = ReorderState::WaitFrames;
        }

        Some(queued.into_picture())
    }

    /// Drain all held back frames at the end of the stream.
    ///
    /// Must be called until it returns `None`, after which the pool starts over with an IDR picture.
    pub(crate) fn flush(&mut self) -> Option<Picture<F>> {
        if let Some(picture) = self.pop() {
            return Some(picture);
        }

        if let Some(mut p_frame) = self.queue.pop_back() {
            // Frames that were waiting for their P-Frame, the most recent one becomes it
            p_frame.picture_type = Some(H265PictureType::P);

            self.mark_queue_as_b_frames();

            if !self.queue.is_empty() {
                self.state = ReorderState::DumpFrames;
            }

            return Some(p_frame.into_picture());
        }

        self.state = ReorderState::Idle;
        self.frame_index = 0;
        self.present_index = 0;

        None
    }

    fn mark_queue_as_b_frames(&mut self) {
        for queued in &mut self.queue {
            queued.picture_type = Some(H265PictureType::B);
        }
    }

    fn set_key_frame(&mut self, queued: &mut QueuedFrame<F>, is_idr: bool) {
        queued.picture_type = Some(H265PictureType::I);

        if is_idr {
            // Start a new IDR period
            self.frame_index = 1;
            self.present_index = 0;

            queued.poc = 0;
            queued.is_idr = true;
        }
    }
}
