use truvis_fg_interface::desc::{RenderPassDesc, SubmitRenderPass};
use truvis_fg_interface::error::FgResult;
use truvis_fg_interface::frame_graph::TaskScheduler;
use truvis_fg_interface::handles::{RenderPassHandle, TaskHandle};

use crate::camera::CameraInfo;
use crate::render_layer::ERenderLayer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ERenderQueueState {
    Uninitialized,
    /// 已经通过 [`RenderQueue::create`] 配置了相机，可以添加 layer 和任务
    Configured,
    Submitted,
}

#[derive(Default)]
struct LayerData {
    enabled: bool,
    pass: SubmitRenderPass,
}

/// 一个相机的分层渲染提交
///
/// 每个 layer 对应一个 render pass，提交时按 [`ERenderLayer`] 的顺序串成一条依赖链。
/// 没有启用的 layer 也会以空 pass 的形式参与 [`submit`](Self::submit)，
/// 保证不同相机之间的 layer 数量一致。
pub struct RenderQueue {
    camera: CameraInfo,
    layers: [LayerData; ERenderLayer::COUNT],
    state: ERenderQueueState,
}
impl Default for RenderQueue {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl RenderQueue {
    pub fn new() -> Self {
        Self {
            camera: CameraInfo::default(),
            layers: Default::default(),
            state: ERenderQueueState::Uninitialized,
        }
    }

    /// 开始新一轮配置，所有 layer 回到未启用状态
    pub fn create(&mut self, camera: CameraInfo) {
        log::trace!("render queue create: {}", camera.name);

        self.camera = camera;
        for (layer, data) in ERenderLayer::ALL.iter().zip(self.layers.iter_mut()) {
            data.enabled = false;
            data.pass = SubmitRenderPass::default().name(format!("{:?}", layer));
        }
        self.state = ERenderQueueState::Configured;
    }
}
// getter
impl RenderQueue {
    #[inline]
    pub fn camera(&self) -> &CameraInfo {
        &self.camera
    }

    #[inline]
    pub fn state(&self) -> ERenderQueueState {
        self.state
    }

    #[inline]
    pub fn is_layer_enabled(&self, layer: ERenderLayer) -> bool {
        self.layers[layer.index()].enabled
    }

    #[inline]
    pub fn layer_pass(&self, layer: ERenderLayer) -> Option<RenderPassHandle> {
        self.layers[layer.index()].pass.pass
    }
}
// tools
impl RenderQueue {
    /// 启用一个 layer，之后添加到该 layer 的绘制都会进入 `pass`
    ///
    /// name 为空时沿用 layer 的名字
    pub fn add_layer(&mut self, layer: ERenderLayer, pass: RenderPassHandle, name: &str) {
        self.assert_configured();
        assert!(
            self.camera.has_layer(layer),
            "render layer {:?} is not declared for camera {}",
            layer,
            self.camera.name
        );

        let data = &mut self.layers[layer.index()];
        assert!(!data.enabled, "render layer {:?} is already enabled", layer);

        data.enabled = true;
        data.pass.pass = Some(pass);
        if !name.is_empty() {
            data.pass.name = name.to_string();
        }
    }

    /// 通过 scheduler 创建 render pass 并启用 layer
    pub fn add_layer_with_desc<S: TaskScheduler>(
        &mut self,
        fg: &mut S,
        layer: ERenderLayer,
        desc: &RenderPassDesc,
        name: &str,
    ) -> FgResult<RenderPassHandle> {
        let pass = fg.create_render_pass(desc)?;
        self.add_layer(layer, pass, name);
        Ok(pass)
    }

    /// 把一个绘制任务挂到 layer 的 render pass 上
    pub fn add_render_obj<S: TaskScheduler>(&mut self, fg: &mut S, layer: ERenderLayer, draw_task: S::DrawTask) {
        assert!(
            self.camera.has_layer(layer),
            "render layer {:?} is not declared for camera {}",
            layer,
            self.camera.name
        );
        let pass = self.layers[layer.index()].pass.pass;
        let Some(pass) = pass else {
            panic!("render layer {:?} is not enabled", layer);
        };

        fg.add_draw_task(pass, draw_task);
    }

    /// 添加一个任务，该任务在 `before_layer` 的 render pass 之前执行
    pub fn add_task<S: TaskScheduler>(&mut self, fg: &mut S, before_layer: ERenderLayer, task: S::Task) -> TaskHandle {
        self.assert_configured();
        assert!(
            self.camera.has_layer(before_layer),
            "render layer {:?} is not declared for camera {}",
            before_layer,
            self.camera.name
        );

        let handle = fg.add_task(task);
        self.layers[before_layer.index()].pass.depends_on(handle);
        handle
    }

    /// 按 layer 顺序提交所有 layer，未启用的 layer 提交为空 pass
    ///
    /// 第一个 layer 依赖 `depends_on`，之后每个 layer 依赖前一个。返回最后一个 layer 的任务。
    pub fn submit<S: TaskScheduler>(&mut self, fg: &mut S, depends_on: &[TaskHandle]) -> TaskHandle {
        self.begin_submit();

        let mut last = fg.submit_render_pass(Self::take_pass(&mut self.layers[0], depends_on));
        for data in self.layers[1..].iter_mut() {
            last = fg.submit_render_pass(Self::take_pass(data, &[last]));
        }
        last
    }

    /// 只提交启用的 layer，依赖链只包含这些 layer
    ///
    /// 通过 [`add_task`](Self::add_task) 挂在未启用 layer 上的任务转移到下一个启用的 layer，
    /// 位于最后一个启用 layer 之后的转移到最后一个启用 layer。
    /// 没有任何 layer 启用时不提交任何任务，返回 None
    pub fn submit_enabled<S: TaskScheduler>(&mut self, fg: &mut S, depends_on: &[TaskHandle]) -> Option<TaskHandle> {
        self.begin_submit();

        if let Some(last_enabled) = self.layers.iter().rposition(|data| data.enabled) {
            for index in last_enabled + 1..ERenderLayer::COUNT {
                let trailing = std::mem::take(&mut self.layers[index].pass.depends_on);
                for dep in trailing {
                    self.layers[last_enabled].pass.depends_on(dep);
                }
            }
        }

        let mut carried: Vec<TaskHandle> = Vec::new();
        let mut last: Option<TaskHandle> = None;
        for data in self.layers.iter_mut() {
            if !data.enabled {
                carried.append(&mut data.pass.depends_on);
                continue;
            }

            let mut pass = match last {
                Some(prev) => Self::take_pass(data, &[prev]),
                None => Self::take_pass(data, depends_on),
            };
            for dep in carried.drain(..) {
                pass.depends_on(dep);
            }
            last = Some(fg.submit_render_pass(pass));
        }

        if !carried.is_empty() {
            log::warn!(
                "camera {}: {} tasks are not joined, no render layer is enabled",
                self.camera.name,
                carried.len()
            );
        }
        last
    }

    fn take_pass(data: &mut LayerData, depends_on: &[TaskHandle]) -> SubmitRenderPass {
        let mut pass = std::mem::take(&mut data.pass);
        for dep in depends_on {
            pass.depends_on(*dep);
        }
        pass
    }

    fn begin_submit(&mut self) {
        assert_eq!(
            self.state,
            ERenderQueueState::Configured,
            "render queue of camera {} must be configured and submitted once",
            self.camera.name
        );
        log::trace!("render queue submit: {}", self.camera.name);
        self.state = ERenderQueueState::Submitted;
    }

    #[inline]
    fn assert_configured(&self) {
        assert_eq!(
            self.state,
            ERenderQueueState::Configured,
            "render queue of camera {} is not configured",
            self.camera.name
        );
    }
}

#[cfg(test)]
mod tests {
    use truvis_fg_interface::host::{HostDrawTask, HostFrameGraph, HostTask};

    use super::*;
    use crate::render_layer::RenderLayerBits;

    fn main_camera() -> CameraInfo {
        CameraInfo::new("main", RenderLayerBits::Opaque | RenderLayerBits::UI | RenderLayerBits::Shadow)
    }

    #[test]
    fn test_submit_chains_all_layers() {
        truvis_crate_tools::init_log::init_test_log();

        let mut fg = HostFrameGraph::new(2);
        let mut queue = RenderQueue::new();
        queue.create(main_camera());

        let opaque = queue.add_layer_with_desc(&mut fg, ERenderLayer::Opaque, &RenderPassDesc::default(), "opaque").unwrap();
        let ui = fg.create_render_pass(&RenderPassDesc::default()).unwrap();
        queue.add_layer(ERenderLayer::UI, ui, "");
        queue.add_render_obj(&mut fg, ERenderLayer::Opaque, HostDrawTask::new("mesh"));

        let upload = fg.add_task(HostTask::new("upload"));
        let last = queue.submit(&mut fg, &[upload]);

        assert_eq!(queue.state(), ERenderQueueState::Submitted);
        assert_eq!(fg.task_count(), 1 + ERenderLayer::COUNT);
        assert_eq!(
            fg.execution_order(),
            vec!["upload", "Background", "Shadow", "DepthOnly", "opaque", "Translucent", "PostProcess", "UI"]
        );
        assert!(fg.depends_on(last, upload));
        assert_eq!(fg.task_pass(last), Some(ui));
        assert_eq!(fg.draw_tasks(opaque), &[HostDrawTask::new("mesh")]);
    }

    #[test]
    fn test_submit_enabled_only() {
        let mut fg = HostFrameGraph::new(2);
        let mut queue = RenderQueue::new();
        queue.create(main_camera());

        queue.add_layer_with_desc(&mut fg, ERenderLayer::UI, &RenderPassDesc::default(), "ui").unwrap();
        queue.add_layer_with_desc(&mut fg, ERenderLayer::Opaque, &RenderPassDesc::default(), "opaque").unwrap();

        let upload = fg.add_task(HostTask::new("upload"));
        let last = queue.submit_enabled(&mut fg, &[upload]).unwrap();

        assert_eq!(fg.task_count(), 3);
        assert_eq!(fg.execution_order(), vec!["upload", "opaque", "ui"]);
        assert_eq!(fg.task_name(last), Some("ui"));
        assert_eq!(fg.direct_dependencies(last).len(), 1);
        assert!(fg.depends_on(last, upload));
    }

    #[test]
    fn test_submit_enabled_keeps_tasks_of_disabled_layers() {
        let mut fg = HostFrameGraph::new(2);
        let mut queue = RenderQueue::new();
        queue.create(main_camera());

        queue.add_layer_with_desc(&mut fg, ERenderLayer::Opaque, &RenderPassDesc::default(), "opaque").unwrap();
        let prepass = queue.add_task(&mut fg, ERenderLayer::Shadow, HostTask::new("prepass"));
        let overlay = queue.add_task(&mut fg, ERenderLayer::UI, HostTask::new("overlay"));

        let last = queue.submit_enabled(&mut fg, &[]).unwrap();
        assert_eq!(fg.task_name(last), Some("opaque"));
        assert!(fg.depends_on(last, prepass));
        assert!(fg.depends_on(last, overlay));
    }

    #[test]
    fn test_submit_enabled_empty() {
        let mut fg = HostFrameGraph::new(2);
        let mut queue = RenderQueue::new();
        queue.create(main_camera());

        assert_eq!(queue.submit_enabled(&mut fg, &[]), None);
        assert_eq!(fg.task_count(), 0);
    }

    #[test]
    fn test_add_task_before_layer() {
        let mut fg = HostFrameGraph::new(2);
        let mut queue = RenderQueue::new();
        queue.create(main_camera());

        queue.add_layer_with_desc(&mut fg, ERenderLayer::Shadow, &RenderPassDesc::default(), "shadow").unwrap();
        queue.add_layer_with_desc(&mut fg, ERenderLayer::Opaque, &RenderPassDesc::default(), "opaque").unwrap();
        let prepass = queue.add_task(&mut fg, ERenderLayer::Opaque, HostTask::new("prepass"));

        let last = queue.submit_enabled(&mut fg, &[]).unwrap();
        assert_eq!(fg.task_name(last), Some("opaque"));

        // 前一个 layer 以及 prepass
        let deps = fg.direct_dependencies(last);
        assert_eq!(deps.len(), 2);
        assert!(deps.contains(&prepass));
        assert!(fg.depends_on(last, prepass));
    }

    #[test]
    fn test_create_resets_layers() {
        let mut fg = HostFrameGraph::new(2);
        let mut queue = RenderQueue::new();
        queue.create(main_camera());
        queue.add_layer_with_desc(&mut fg, ERenderLayer::Opaque, &RenderPassDesc::default(), "opaque").unwrap();
        queue.submit(&mut fg, &[]);

        queue.create(main_camera());
        assert_eq!(queue.state(), ERenderQueueState::Configured);
        assert!(ERenderLayer::ALL.iter().all(|layer| !queue.is_layer_enabled(*layer)));
        assert_eq!(queue.layer_pass(ERenderLayer::Opaque), None);

        // 同一个 layer 在新一轮配置中可以再次启用
        queue.add_layer_with_desc(&mut fg, ERenderLayer::Opaque, &RenderPassDesc::default(), "opaque").unwrap();
        assert!(queue.is_layer_enabled(ERenderLayer::Opaque));
    }

    #[test]
    #[should_panic(expected = "already enabled")]
    fn test_enable_layer_twice() {
        let mut fg = HostFrameGraph::new(2);
        let mut queue = RenderQueue::new();
        queue.create(main_camera());

        queue.add_layer_with_desc(&mut fg, ERenderLayer::Opaque, &RenderPassDesc::default(), "a").unwrap();
        queue.add_layer_with_desc(&mut fg, ERenderLayer::Opaque, &RenderPassDesc::default(), "b").unwrap();
    }

    #[test]
    #[should_panic(expected = "not declared")]
    fn test_undeclared_layer() {
        let mut fg = HostFrameGraph::new(2);
        let mut queue = RenderQueue::new();
        queue.create(main_camera());

        queue.add_layer_with_desc(&mut fg, ERenderLayer::Translucent, &RenderPassDesc::default(), "").unwrap();
    }

    #[test]
    #[should_panic(expected = "not declared")]
    fn test_draw_into_undeclared_layer() {
        let mut fg = HostFrameGraph::new(2);
        let mut queue = RenderQueue::new();
        queue.create(main_camera());

        queue.add_render_obj(&mut fg, ERenderLayer::PostProcess, HostDrawTask::new("quad"));
    }

    #[test]
    #[should_panic(expected = "submitted once")]
    fn test_submit_twice() {
        let mut fg = HostFrameGraph::new(2);
        let mut queue = RenderQueue::new();
        queue.create(main_camera());

        queue.submit(&mut fg, &[]);
        queue.submit(&mut fg, &[]);
    }
}
