/// 帧计数器
///
/// 帧序号一直累加，ring slot 由帧序号对 ring buffer 大小取模得到。
/// 同一个 ring slot 上的资源只有在 GPU 用完上一轮之后才能复用，由外部的 fence 保证。
#[derive(Debug, Clone)]
pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
    ring_size: usize,
}
// new & init
impl FrameCounter {
    pub fn new(init_frame_id: u64, ring_size: usize) -> Self {
        assert!(ring_size > 0, "ring buffer size must be non-zero");
        Self {
            frame_id: init_frame_id,
            ring_size,
        }
    }
}
// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}
// getters
impl FrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    #[inline]
    pub fn ring_size(&self) -> usize {
        self.ring_size
    }

    /// 当前帧使用的 ring slot
    #[inline]
    pub fn ring_slot(&self) -> usize {
        (self.frame_id % self.ring_size as u64) as usize
    }

    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}-{}]", self.frame_id, self.ring_slot())
    }
}
