use slotmap::new_key_type;

new_key_type! {
    /// GPU Buffer Handle
    ///
    /// 由全局资源管理器持有，核心只保存 handle，不负责资源的生命周期（staging buffer 除外）。
    pub struct BufferHandle;
    /// GPU Image Handle
    pub struct ImageHandle;
    /// 设备内存 Handle，用于查询映射指针、偏移和一致性标志
    pub struct MemoryHandle;
    /// RenderPass Handle
    pub struct RenderPassHandle;
    /// 已提交到调度器的任务
    pub struct TaskHandle;
}
