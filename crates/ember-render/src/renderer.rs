use ember_log::{info, warn};
use ember_render_base::{Frame, IndexedDraw, Vertex, FRAMES_IN_FLIGHT};
use ember_render_camera::Camera;
use ember_render_lighting::{
    culling::LightCulling,
    tiles::{TileGrid, TileGridError},
};
use ember_render_shadows::{DepthBias, ShadowCascades};
use ember_vk::{
    buffer::BufferCreateError,
    context::{Context, ContextCreateError, ContextCreateInfo},
    shader::ShaderLibrary,
    surface::{AcquireResult, PresentResult, Surface, SurfaceConfiguration, SurfaceError},
    vk,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::{
    forward::{sort_draws, DebugMode, ForwardCreateError, ForwardInputs, ForwardPass},
    frame::{FrameError, FrameRing, ResizeTracker},
    mesh::{Mesh, MeshError, Meshes},
    scene::{MeshHandle, SceneSnapshot},
    settings::{RendererSettings, SettingsError},
    slot::{FrameResources, FrameResourcesCreateError},
    strategy::RenderStrategy,
};

const APP_NAME: &str = "ember";

#[derive(Debug, Error)]
pub enum RendererCreateError {
    #[error("{0}")]
    Settings(#[from] SettingsError),
    #[error("{0}")]
    Context(#[from] ContextCreateError),
    #[error("{0}")]
    Surface(#[from] SurfaceError),
    #[error("{0}")]
    TileGrid(#[from] TileGridError),
    #[error("{0}")]
    Forward(#[from] ForwardCreateError),
    #[error("{0}")]
    FrameResources(#[from] FrameResourcesCreateError),
}

/// Errors that stop a frame from being produced. Problems within a single pass are logged and
/// don't surface here.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{0}")]
    Frame(#[from] FrameError<vk::Result>),
    #[error("{0}")]
    Surface(#[from] SurfaceError),
    #[error("{0}")]
    Forward(#[from] ForwardCreateError),
    #[error("{0}")]
    Buffer(#[from] BufferCreateError),
    #[error("vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// The frame was presented but the swapchain no longer matches the window. It is rebuilt
    /// before the next frame.
    PresentedStale,
    /// Nothing was drawn because the window is minimized or the swapchain was out of date.
    Skipped,
}

/// Forward+ renderer drawing into a window.
pub struct Renderer {
    ring: FrameRing<FrameResources>,
    forward: ForwardPass,
    culling: Option<LightCulling>,
    shadows: Option<ShadowCascades>,
    meshes: Meshes,
    surface: Surface,
    grid: TileGrid,
    resize: ResizeTracker,
    strategy: RenderStrategy,
    settings: RendererSettings,
    ctx: Context,
}

impl Renderer {
    pub fn new<W: HasDisplayHandle + HasWindowHandle>(
        window: &W,
        settings: RendererSettings,
    ) -> Result<Self, RendererCreateError> {
        settings.validate()?;

        let ctx = Context::new(ContextCreateInfo {
            app_name: APP_NAME,
            window,
            debug: settings.debug,
        })?;

        let surface = Surface::new(
            &ctx,
            window,
            SurfaceConfiguration {
                width: settings.width,
                height: settings.height,
                present_mode: settings.present_mode,
            },
        )?;

        let shaders = ShaderLibrary::new(&settings.shader_dir);
        let extent = surface.extent();
        let grid = TileGrid::new(
            extent.width,
            extent.height,
            settings.tile_size,
            settings.max_lights_per_tile,
        )?;

        let mut strategy = RenderStrategy::negotiate(ctx.capabilities(), &settings, &grid);
        if !strategy.tiled() {
            warn!("tiled light culling is unavailable, every light will be shaded per fragment");
        }

        let mut shadows = None;
        if strategy.shadows() {
            match ShadowCascades::new(&ctx, &shaders, &settings.shadows, &Camera::default()) {
                Ok(cascades) => shadows = Some(cascades),
                Err(err) => {
                    warn!("shadows disabled: {err}");
                    strategy = RenderStrategy::Forward { shadows: false };
                }
            }
        }

        let mut culling = None;
        if strategy.tiled() {
            match LightCulling::new(&ctx, &shaders, grid) {
                Ok(pass) => culling = Some(pass),
                Err(err) => {
                    warn!("light culling disabled: {err}");
                    strategy = strategy.without_culling();
                }
            }
        }

        // Fall back to simpler shading when a pipeline can't be built
        let forward = loop {
            match ForwardPass::new(&ctx, &shaders, &surface, strategy) {
                Ok(forward) => break forward,
                Err(err) => match strategy.downgrade() {
                    Some(next) => {
                        warn!("unable to create the {strategy} pass: {err}. Trying {next}.");
                        strategy = next;
                    }
                    None => return Err(err.into()),
                },
            }
        };
        if !strategy.tiled() {
            culling = None;
        }
        if !strategy.shadows() {
            shadows = None;
        }

        let slots = (0..FRAMES_IN_FLIGHT)
            .map(|i| FrameResources::new(&ctx, i, settings.max_lights))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "renderer ready: {} at {}x{} on {} swapchain images",
            strategy,
            extent.width,
            extent.height,
            surface.image_count()
        );

        Ok(Self {
            ring: FrameRing::new(slots),
            forward,
            culling,
            shadows,
            meshes: Meshes::default(),
            resize: ResizeTracker::new(settings.width, settings.height),
            surface,
            grid,
            strategy,
            settings,
            ctx,
        })
    }

    #[inline(always)]
    pub fn strategy(&self) -> RenderStrategy {
        self.strategy
    }

    #[inline(always)]
    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    #[inline(always)]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Tile grid for the current surface size.
    #[inline(always)]
    pub fn tile_grid(&self) -> &TileGrid {
        &self.grid
    }

    #[inline(always)]
    pub fn surface_extent(&self) -> vk::Extent2D {
        self.surface.extent()
    }

    #[inline(always)]
    pub fn frame_number(&self) -> u64 {
        self.ring.frame_number()
    }

    #[inline(always)]
    pub fn debug_mode(&self) -> DebugMode {
        self.forward.debug_mode()
    }

    /// Switches to the next shadow debug view and returns it.
    pub fn cycle_debug_mode(&mut self) -> DebugMode {
        let mode = self.forward.debug_mode().next();
        self.forward.set_debug_mode(mode);
        info!("debug mode: {mode:?}");
        mode
    }

    /// Depth bias used for shadow cascades. `None` when shadows are disabled.
    #[inline]
    pub fn depth_bias(&self) -> Option<DepthBias> {
        self.shadows.as_ref().map(ShadowCascades::depth_bias)
    }

    /// Takes effect on the next frame recorded.
    pub fn set_depth_bias(&mut self, bias: DepthBias) {
        if let Some(shadows) = &mut self.shadows {
            shadows.set_depth_bias(bias);
        }
    }

    /// Uploads geometry once. Drawables refer to it by the returned handle from then on.
    pub fn upload_mesh(
        &mut self,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<MeshHandle, MeshError> {
        let mesh = Mesh::new(&self.ctx, vertices, indices)?;
        Ok(self.meshes.insert(mesh))
    }

    /// Rebuilds swapchain bound resources for a new window size. Does nothing if the size hasn't
    /// changed since the last rebuild.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        self.resize.request(width, height);
        self.apply_resize()
    }

    /// Renders and presents one frame of `scene`.
    pub fn render(&mut self, scene: &SceneSnapshot) -> Result<FrameOutcome, RenderError> {
        self.apply_resize()?;
        if self.resize.is_minimized() {
            return Ok(FrameOutcome::Skipped);
        }

        // Blocks until the slot's previous frame is done on the GPU
        let frame = self.ring.begin()?;

        let image_available = self.ring.slot(frame).image_available.semaphore();
        let (image_index, suboptimal) = match self.surface.acquire_image(image_available) {
            Ok(AcquireResult::Image { index, suboptimal }) => (index, suboptimal),
            Ok(AcquireResult::OutOfDate) => {
                self.ring.abandon()?;
                self.resize.invalidate();
                return Ok(FrameOutcome::Skipped);
            }
            Err(err) => {
                self.ring.abandon()?;
                return Err(err.into());
            }
        };

        let mut draws = self.meshes.resolve(scene);
        sort_draws(&mut draws, scene.camera.position());

        if let Some(shadows) = &mut self.shadows {
            if let Err(err) = shadows.update(&scene.camera, scene.light_direction) {
                warn!("shadow cascades kept from the last frame: {err}");
            }
        }

        let slot = self.ring.record()?;

        // Per frame uploads
        let extent = self.surface.extent();
        let camera = scene
            .camera
            .into_gpu_struct(extent.width as f32, extent.height as f32);
        if let Err(err) = slot.camera_ubo.write(0, &[camera]) {
            warn!("unable to upload camera: {err}");
        }
        let num_lights = slot.lights.update(scene.lights).count;

        let grid = self.culling.as_ref().map_or(&self.grid, LightCulling::grid);
        if let Err(err) = slot.lighting_ubo.write(0, &[grid.gpu_params(num_lights)]) {
            warn!("unable to upload lighting parameters: {err}");
        }
        if let Some(shadows) = &self.shadows {
            if let Err(err) = slot.shadow_ubo.write(0, &[shadows.gpu_data()]) {
                warn!("unable to upload shadow cascades: {err}");
            }
        }

        self.forward.update_set(
            frame,
            &ForwardInputs {
                camera: &slot.camera_ubo,
                lights: slot.lights.buffer(),
                lighting: &slot.lighting_ubo,
                shadow: &slot.shadow_ubo,
                culling: self.culling.as_ref(),
                shadows: self.shadows.as_ref(),
            },
        );
        if let Some(culling) = &self.culling {
            culling.update_set(frame, &slot.camera_ubo, slot.lights.buffer());
        }

        let cb = slot.command_buffer;
        let render_finished = slot.render_finished.semaphore();

        if let Err(err) = self.record_commands(cb, frame, image_index, &draws, num_lights) {
            warn!("frame {} dropped, recording failed: {err}", self.ring.frame_number());
            self.ring.cancel()?;
            self.release_acquired_image(image_available)?;
            return Ok(FrameOutcome::Skipped);
        }

        let device = self.ctx.device();
        let wait_semaphores = [image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [render_finished];
        let command_buffers = [cb];
        let queue = self.ctx.graphics_queue();
        self.ring.submit(|slot| {
            let submit_info = vk::SubmitInfo::default()
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages)
                .command_buffers(&command_buffers)
                .signal_semaphores(&signal_semaphores);
            unsafe { device.queue_submit(queue, &[submit_info], slot.in_flight.fence()) }
        })?;

        self.ring.present()?;
        let present = self.surface.present(image_index, render_finished);
        self.ring.finish()?;

        match present? {
            PresentResult::Ok if !suboptimal => Ok(FrameOutcome::Presented),
            _ => {
                self.resize.invalidate();
                Ok(FrameOutcome::PresentedStale)
            }
        }
    }

    /// Records every pass in their fixed order.
    fn record_commands(
        &self,
        cb: vk::CommandBuffer,
        frame: Frame,
        image_index: u32,
        draws: &[IndexedDraw],
        num_lights: u32,
    ) -> Result<(), vk::Result> {
        let device = self.ctx.device();
        unsafe {
            device.reset_command_buffer(cb, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(
                cb,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
        }

        if let Some(shadows) = &self.shadows {
            shadows.record(cb, draws);
        }
        if let Some(culling) = &self.culling {
            culling.record(cb, frame, num_lights);
        }
        self.forward.record_prepass(cb, frame, draws);
        self.forward
            .record_forward(cb, frame, image_index as usize, draws);

        unsafe { device.end_command_buffer(cb) }
    }

    /// Consumes the acquire semaphore of a frame that won't be submitted and schedules a
    /// swapchain rebuild, which hands the unpresented image back.
    fn release_acquired_image(&mut self, image_available: vk::Semaphore) -> Result<(), RenderError> {
        let device = self.ctx.device();
        let queue = self.ctx.graphics_queue();
        let wait_semaphores = [image_available];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages);
        unsafe {
            device.queue_submit(queue, &[submit_info], vk::Fence::null())?;
            // The semaphore is reused by the slot's next acquire
            device.queue_wait_idle(queue)?;
        }
        self.resize.invalidate();
        Ok(())
    }

    fn apply_resize(&mut self) -> Result<(), RenderError> {
        let Some((width, height)) = self.resize.take() else {
            return Ok(());
        };

        if let Err(err) = self.rebuild(width, height) {
            // Try again on the next frame
            self.resize.invalidate();
            return Err(err);
        }
        Ok(())
    }

    fn rebuild(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        self.ctx.wait_idle()?;

        self.surface.update_config(SurfaceConfiguration {
            width,
            height,
            present_mode: self.settings.present_mode,
        })?;
        let extent = self.surface.extent();

        self.grid = self.grid.resized(extent.width, extent.height);
        if let Some(culling) = &mut self.culling {
            culling.resize(extent.width, extent.height)?;
        }
        self.forward.resize(&self.surface)?;

        info!(
            "swapchain rebuilt at {}x{}: {}x{} tiles, {} framebuffers",
            extent.width,
            extent.height,
            self.grid.num_tiles_x(),
            self.grid.num_tiles_y(),
            self.forward.framebuffer_count()
        );
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Nothing may be destroyed while the GPU is still using it
        if let Err(err) = self.ctx.wait_idle() {
            warn!("unable to wait for the device before shutdown: {err}");
        }
    }
}
