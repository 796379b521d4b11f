/// 任务的执行顺序
///
/// 同一资源上的 barrier 之间的先后关系完全由该序号决定：序号大的任务的需求，
/// 永远不会回退一个已经提交的状态转换。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExeOrderIndex(pub u32);

impl ExeOrderIndex {
    /// 资源的初始状态，早于任何任务
    pub const INITIAL: Self = Self(0);
    /// 第一个任务
    pub const FIRST: Self = Self(1);
    /// 晚于任何任务，用于帧末尾的最终状态
    pub const FINAL: Self = Self(u32::MAX);

    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    pub fn next(self) -> Self {
        debug_assert!(self < Self::FINAL);
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for ExeOrderIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::INITIAL => write!(f, "Initial"),
            Self::FINAL => write!(f, "Final"),
            Self(index) => write!(f, "#{index}"),
        }
    }
}
