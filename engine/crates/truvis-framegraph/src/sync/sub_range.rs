/// 资源状态空间中的一段半开区间 `[begin, end)`
///
/// buffer 的单位是字节；image 的单位是子资源，按 `mip * array_layers + layer` 线性化。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SubRange {
    pub begin: u64,
    pub end: u64,
}

impl SubRange {
    #[inline]
    pub const fn new(begin: u64, end: u64) -> Self {
        Self { begin, end }
    }

    #[inline]
    pub fn from_offset_size(offset: u64, size: u64) -> Self {
        Self::new(offset, offset + size)
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.begin)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.begin < other.end && other.begin < self.end
    }

    /// 首尾相接，但不重叠
    #[inline]
    pub fn touches(&self, other: &Self) -> bool {
        self.end == other.begin || other.end == self.begin
    }

    #[inline]
    pub fn contains(&self, other: &Self) -> bool {
        self.begin <= other.begin && other.end <= self.end
    }

    /// 交集，不相交时返回空区间
    #[inline]
    pub fn intersect(&self, other: &Self) -> Self {
        let begin = self.begin.max(other.begin);
        let end = self.end.min(other.end);
        Self::new(begin, end.max(begin))
    }

    /// 包含两个区间的最小区间
    #[inline]
    pub fn union(&self, other: &Self) -> Self {
        Self::new(self.begin.min(other.begin), self.end.max(other.end))
    }
}

impl std::fmt::Display for SubRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}
