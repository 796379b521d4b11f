//! 资源状态跟踪的通用部分
//!
//! image 和 buffer 共用同一套算法，区别只在于区间的单位和是否带有 layout：
//! buffer 的 layout 始终为 `UNDEFINED`。

use ash::vk;
use itertools::Itertools;
use truvis_fg_interface::exe_order::ExeOrderIndex;
use truvis_fg_interface::resource_state::ResourceState;

use crate::sync::sub_range::SubRange;

/// 某个子资源区间上的状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceBarrier {
    pub range: SubRange,
    pub layout: vk::ImageLayout,
    pub stages: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    /// 最后一次使用该区间的任务
    pub index: ExeOrderIndex,
    pub is_readable: bool,
    pub is_writable: bool,
}
impl ResourceBarrier {
    pub fn new(range: SubRange, layout: vk::ImageLayout, state: ResourceState, index: ExeOrderIndex) -> Self {
        Self {
            range,
            layout,
            stages: state.stages,
            access: state.access,
            index,
            is_readable: state.is_readable(),
            is_writable: state.is_writable(),
        }
    }

    #[inline]
    pub fn state(&self) -> ResourceState {
        ResourceState::new(self.stages, self.access)
    }

    /// 除了区间和执行序号之外完全相同
    #[inline]
    pub fn same_state(&self, other: &Self) -> bool {
        self.layout == other.layout
            && self.stages == other.stages
            && self.access == other.access
            && self.is_readable == other.is_readable
            && self.is_writable == other.is_writable
    }

    #[inline]
    fn with_range(&self, range: SubRange) -> Self {
        Self { range, ..*self }
    }

    /// 两个状态之间不需要 barrier：layout 相同，并且访问意图完全相同或者都是只读
    fn is_compatible(&self, next: &Self) -> bool {
        self.layout == next.layout
            && ((self.stages == next.stages && self.access == next.access) || (!self.is_writable && !next.is_writable))
    }

    /// 同一段区间上两个兼容的状态合并为一个
    fn merge(&self, next: &Self) -> Self {
        Self {
            range: self.range,
            layout: self.layout,
            stages: self.stages | next.stages,
            access: self.access | next.access,
            index: self.index.max(next.index),
            is_readable: self.is_readable || next.is_readable,
            is_writable: self.is_writable || next.is_writable,
        }
    }
}

/// 一次需要发出的状态转换
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceTransition {
    pub range: SubRange,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src: ResourceState,
    pub dst: ResourceState,
}
impl ResourceTransition {
    /// 区间首尾相接，且状态完全相同，可以合并为一个 barrier
    #[inline]
    fn can_coalesce(&self, next: &Self) -> bool {
        self.range.end == next.range.begin
            && self.old_layout == next.old_layout
            && self.new_layout == next.new_layout
            && self.src == next.src
            && self.dst == next.dst
    }
}

/// 录制上下文中单个资源的状态镜像
///
/// - `pending_barriers`: 本批次任务声明的状态，commit 之前不计算 barrier
/// - `read_write_barriers`: 已经提交的状态，按区间排序且互不重叠
///
/// 未被任何任务使用过的区间不存在于 `read_write_barriers` 中，视为资源的初始状态。
#[derive(Debug)]
pub struct LocalResourceStateTracker {
    full_range: SubRange,
    initial_layout: vk::ImageLayout,
    pending_barriers: Vec<ResourceBarrier>,
    read_write_barriers: Vec<ResourceBarrier>,
}
// new & init
impl LocalResourceStateTracker {
    pub fn new(full_range: SubRange, initial_layout: vk::ImageLayout) -> Self {
        Self {
            full_range,
            initial_layout,
            pending_barriers: Vec::new(),
            read_write_barriers: Vec::new(),
        }
    }
}
// getter
impl LocalResourceStateTracker {
    #[inline]
    pub fn full_range(&self) -> SubRange {
        self.full_range
    }

    #[inline]
    pub fn initial_layout(&self) -> vk::ImageLayout {
        self.initial_layout
    }

    #[inline]
    pub fn pending_barriers(&self) -> &[ResourceBarrier] {
        &self.pending_barriers
    }

    #[inline]
    pub fn read_write_barriers(&self) -> &[ResourceBarrier] {
        &self.read_write_barriers
    }
}
// tools
impl LocalResourceStateTracker {
    /// 声明一个任务将要以 `state` 使用 `range`
    ///
    /// 同一任务、同一 layout 的重叠（或首尾相接且状态相同）的声明会被合并。
    pub fn add_pending_state(
        &mut self,
        range: SubRange,
        layout: vk::ImageLayout,
        state: ResourceState,
        index: ExeOrderIndex,
    ) {
        debug_assert!(
            state.is_readable() || state.is_writable(),
            "resource state must read or write: {:?}",
            state
        );
        if !state.is_readable() && !state.is_writable() {
            log::error!("skip pending state without read or write access: {:?}", state);
            return;
        }

        debug_assert!(
            self.full_range.contains(&range),
            "range {} out of resource range {}",
            range,
            self.full_range
        );
        if range.is_empty() || !self.full_range.contains(&range) {
            log::error!("skip pending state with invalid range {}", range);
            return;
        }

        let mut barrier = ResourceBarrier::new(range, layout, state, index);
        while let Some(pos) = self.pending_barriers.iter().position(|pending| {
            pending.index == barrier.index
                && pending.layout == barrier.layout
                && (pending.range.overlaps(&barrier.range)
                    || (pending.range.touches(&barrier.range) && pending.same_state(&barrier)))
        }) {
            let pending = self.pending_barriers.remove(pos);
            barrier = pending.merge(&barrier).with_range(pending.range.union(&barrier.range));
        }
        self.pending_barriers.push(barrier);
    }

    /// 把所有 pending 状态解析为状态转换，并更新已提交的状态
    ///
    /// 返回的转换已经按区间合并：相邻且状态相同的转换只出现一次。
    pub fn commit(&mut self) -> Vec<ResourceTransition> {
        if self.pending_barriers.is_empty() {
            return Vec::new();
        }

        let mut pending_barriers = std::mem::take(&mut self.pending_barriers);
        pending_barriers.sort_by_key(|pending| pending.index);

        let mut transitions: Vec<ResourceTransition> = Vec::new();
        for pending in &pending_barriers {
            let first = find_first_barrier(&self.read_write_barriers, &pending.range);
            let mut pieces = Vec::new();
            let mut cursor = pending.range.begin;

            for prior in self.read_write_barriers[first..].iter().take_while(|b| b.range.begin < pending.range.end) {
                if cursor < prior.range.begin {
                    let gap = pending.with_range(SubRange::new(cursor, prior.range.begin));
                    self.resolve_initial(&gap, &mut transitions);
                    pieces.push(gap);
                }

                let overlap = prior.range.intersect(&pending.range);
                let prior = prior.with_range(overlap);
                let next = pending.with_range(overlap);
                debug_assert!(prior.index <= next.index, "task {} regresses state of task {}", next.index, prior.index);

                if prior.is_compatible(&next) {
                    pieces.push(prior.merge(&next));
                } else {
                    push_transition(
                        &mut transitions,
                        ResourceTransition {
                            range: overlap,
                            old_layout: prior.layout,
                            new_layout: next.layout,
                            src: prior.state(),
                            dst: next.state(),
                        },
                    );
                    pieces.push(next);
                }
                cursor = overlap.end;
            }

            if cursor < pending.range.end {
                let gap = pending.with_range(SubRange::new(cursor, pending.range.end));
                self.resolve_initial(&gap, &mut transitions);
                pieces.push(gap);
            }

            replace_barrier(&mut self.read_write_barriers, first, pending.range, pieces);
        }

        // 按执行序号解析时，序号靠后的任务可能位于区间左侧
        let transitions = coalesce_transitions(transitions);

        log::trace!(
            "commit {} pending states into {} transitions",
            pending_barriers.len(),
            transitions.len()
        );

        // 复用分配
        pending_barriers.clear();
        self.pending_barriers = pending_barriers;
        transitions
    }

    /// 丢弃所有状态，资源回到初始状态
    pub fn reset(&mut self) {
        self.pending_barriers.clear();
        self.read_write_barriers.clear();
    }

    /// 第一次使用的区间：layout 与初始 layout 不同时需要一次 layout 转换
    fn resolve_initial(&self, first_use: &ResourceBarrier, transitions: &mut Vec<ResourceTransition>) {
        if first_use.layout == self.initial_layout {
            return;
        }
        push_transition(
            transitions,
            ResourceTransition {
                range: first_use.range,
                old_layout: self.initial_layout,
                new_layout: first_use.layout,
                src: ResourceState::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE),
                dst: first_use.state(),
            },
        );
    }
}

fn push_transition(transitions: &mut Vec<ResourceTransition>, transition: ResourceTransition) {
    match transitions.last_mut() {
        Some(last) if last.can_coalesce(&transition) => last.range.end = transition.range.end,
        _ => transitions.push(transition),
    }
}

/// 按区间起点稳定排序后合并所有首尾相接且状态相同的转换
///
/// 同一区间上先后两次转换的相对顺序保持不变。
fn coalesce_transitions(mut transitions: Vec<ResourceTransition>) -> Vec<ResourceTransition> {
    if transitions.len() < 2 {
        return transitions;
    }
    transitions.sort_by_key(|transition| transition.range.begin);
    transitions
        .into_iter()
        .coalesce(|prev, next| {
            if prev.can_coalesce(&next) {
                Ok(ResourceTransition {
                    range: SubRange::new(prev.range.begin, next.range.end),
                    ..prev
                })
            } else {
                Err((prev, next))
            }
        })
        .collect()
}

/// 第一个结束位置在 `range.begin` 之后的 barrier
fn find_first_barrier(barriers: &[ResourceBarrier], range: &SubRange) -> usize {
    barriers.partition_point(|barrier| barrier.range.end <= range.begin)
}

/// 用 `pieces` 替换 `[first, ..)` 中与 `range` 重叠的部分
///
/// 被部分覆盖的首尾 barrier 保留其未被覆盖的部分。`pieces` 必须按区间排序并恰好覆盖 `range`。
fn replace_barrier(barriers: &mut Vec<ResourceBarrier>, first: usize, range: SubRange, pieces: Vec<ResourceBarrier>) {
    let last = first
        + barriers[first..]
            .iter()
            .take_while(|barrier| barrier.range.begin < range.end)
            .count();

    let mut replacement = Vec::with_capacity(pieces.len() + 2);
    if let Some(head) = barriers.get(first).filter(|_| first < last) {
        if head.range.begin < range.begin {
            replacement.push(head.with_range(SubRange::new(head.range.begin, range.begin)));
        }
    }
    replacement.extend(pieces);
    if last > first {
        let tail = &barriers[last - 1];
        if tail.range.end > range.end {
            replacement.push(tail.with_range(SubRange::new(range.end, tail.range.end)));
        }
    }

    barriers.splice(first..last, replacement);
}
