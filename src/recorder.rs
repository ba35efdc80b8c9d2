// Command recording
//
// A frame is described as an ordered list of `Command`s; the backend turns
// that list into real vkCmd* calls between begin/end. Building the list is
// pure, so the barrier choreography can be checked without a GPU.
//
// Per-frame layout transitions of the swapchain image:
//
//   UNDEFINED ──> COLOR_ATTACHMENT_OPTIMAL ──(draw)──> PRESENT_SRC_KHR
//
// The depth image is cleared every frame, so it also starts from UNDEFINED.

use ash::vk;
use glam::Mat4;

/// Early and late fragment tests; depth writes can land in either.
const DEPTH_TEST_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw() | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw(),
);

/// One image layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Barrier(ImageBarrier),
    BeginRendering {
        color_view: vk::ImageView,
        depth_view: Option<vk::ImageView>,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
        clear_depth: f32,
    },
    /// Viewport and scissor covering the whole extent
    SetViewportScissor(vk::Extent2D),
    BindPipeline(vk::Pipeline),
    BindDescriptorSet {
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    },
    BindVertexBuffer(vk::Buffer),
    /// Indices are always u32
    BindIndexBuffer(vk::Buffer),
    /// One column-major 4x4 matrix at offset 0, vertex stage
    PushTransform {
        layout: vk::PipelineLayout,
        matrix: Mat4,
    },
    DrawIndexed {
        index_count: u32,
    },
    EndRendering,
    CopyBufferToImage {
        buffer: vk::Buffer,
        image: vk::Image,
        extent: vk::Extent2D,
    },
}

/// The swapchain image being drawn this frame and its companions.
#[derive(Clone, Copy, Debug)]
pub struct FrameTarget {
    pub color_image: vk::Image,
    pub color_view: vk::ImageView,
    /// `(image, view)` of the depth target, when depth testing is on
    pub depth: Option<(vk::Image, vk::ImageView)>,
    pub extent: vk::Extent2D,
}

/// What a single mesh draw needs.
#[derive(Clone, Copy, Debug)]
pub struct DrawItem {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub transform: Mat4,
}

/// Pipeline state shared by all draws of the frame.
#[derive(Clone, Copy, Debug)]
pub struct PipelineBinding {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
}

/// Commands for one frame, in submission order.
pub fn record_frame(
    target: &FrameTarget,
    pipeline: &PipelineBinding,
    draws: &[DrawItem],
    view_projection: Mat4,
    clear_color: [f32; 4],
) -> Vec<Command> {
    let mut commands = Vec::with_capacity(8 + draws.len() * 4);

    // ─────────────────────────────────────────────────────────────────────────
    // UNDEFINED -> COLOR_ATTACHMENT_OPTIMAL
    // ─────────────────────────────────────────────────────────────────────────
    commands.push(Command::Barrier(ImageBarrier {
        image: target.color_image,
        aspect: vk::ImageAspectFlags::COLOR,
        old_layout: vk::ImageLayout::UNDEFINED,
        new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        // Chains to the image-available wait, which sits at this stage
        src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access: vk::AccessFlags::empty(),
        dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
    }));

    if let Some((depth_image, _)) = target.depth {
        commands.push(Command::Barrier(ImageBarrier {
            image: depth_image,
            aspect: vk::ImageAspectFlags::DEPTH,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            // One depth image is shared by every slot: order after the
            // previous frame's depth writes
            src_stage: DEPTH_TEST_STAGES,
            dst_stage: DEPTH_TEST_STAGES,
            src_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        }));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // DRAW
    // ─────────────────────────────────────────────────────────────────────────
    commands.push(Command::BeginRendering {
        color_view: target.color_view,
        depth_view: target.depth.map(|(_, view)| view),
        extent: target.extent,
        clear_color,
        clear_depth: 1.0,
    });
    commands.push(Command::SetViewportScissor(target.extent));
    commands.push(Command::BindPipeline(pipeline.pipeline));
    commands.push(Command::BindDescriptorSet {
        layout: pipeline.layout,
        set: pipeline.descriptor_set,
    });

    for draw in draws {
        commands.push(Command::BindVertexBuffer(draw.vertex_buffer));
        commands.push(Command::BindIndexBuffer(draw.index_buffer));
        commands.push(Command::PushTransform {
            layout: pipeline.layout,
            matrix: view_projection * draw.transform,
        });
        commands.push(Command::DrawIndexed {
            index_count: draw.index_count,
        });
    }

    commands.push(Command::EndRendering);

    // ─────────────────────────────────────────────────────────────────────────
    // COLOR_ATTACHMENT_OPTIMAL -> PRESENT_SRC
    // ─────────────────────────────────────────────────────────────────────────
    commands.push(Command::Barrier(ImageBarrier {
        image: target.color_image,
        aspect: vk::ImageAspectFlags::COLOR,
        old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dst_access: vk::AccessFlags::empty(),
    }));

    commands
}

/// Staging buffer -> sampled image, as recorded into a one-shot command buffer.
pub fn record_image_upload(staging: vk::Buffer, image: vk::Image, extent: vk::Extent2D) -> Vec<Command> {
    vec![
        Command::Barrier(ImageBarrier {
            image,
            aspect: vk::ImageAspectFlags::COLOR,
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
        }),
        Command::CopyBufferToImage {
            buffer: staging,
            image,
            extent,
        },
        Command::Barrier(ImageBarrier {
            image,
            aspect: vk::ImageAspectFlags::COLOR,
            old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn target(depth: bool) -> FrameTarget {
        FrameTarget {
            color_image: vk::Image::from_raw(1),
            color_view: vk::ImageView::from_raw(2),
            depth: depth.then(|| (vk::Image::from_raw(3), vk::ImageView::from_raw(4))),
            extent: vk::Extent2D { width: 800, height: 600 },
        }
    }

    fn binding() -> PipelineBinding {
        PipelineBinding {
            pipeline: vk::Pipeline::from_raw(10),
            layout: vk::PipelineLayout::from_raw(11),
            descriptor_set: vk::DescriptorSet::from_raw(12),
        }
    }

    fn draw(index_count: u32, transform: Mat4) -> DrawItem {
        DrawItem {
            vertex_buffer: vk::Buffer::from_raw(20),
            index_buffer: vk::Buffer::from_raw(21),
            index_count,
            transform,
        }
    }

    fn barriers(commands: &[Command]) -> Vec<ImageBarrier> {
        commands
            .iter()
            .filter_map(|command| match command {
                Command::Barrier(barrier) => Some(*barrier),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn frame_starts_and_ends_with_color_transitions() {
        let commands = record_frame(&target(true), &binding(), &[draw(6, Mat4::IDENTITY)], Mat4::IDENTITY, [0.1, 0.1, 0.1, 1.0]);

        let first = match &commands[0] {
            Command::Barrier(barrier) => *barrier,
            other => panic!("expected barrier, got {:?}", other),
        };
        assert_eq!(first.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(first.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(first.src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(first.dst_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(first.dst_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

        let last = match commands.last() {
            Some(Command::Barrier(barrier)) => *barrier,
            other => panic!("expected barrier, got {:?}", other),
        };
        assert_eq!(last.image, first.image);
        assert_eq!(last.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(last.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(last.dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    #[test]
    fn depth_barrier_only_when_depth_target_present() {
        let with_depth = record_frame(&target(true), &binding(), &[], Mat4::IDENTITY, [0.0; 4]);
        let without_depth = record_frame(&target(false), &binding(), &[], Mat4::IDENTITY, [0.0; 4]);

        let depth = barriers(&with_depth)
            .into_iter()
            .find(|b| b.aspect == vk::ImageAspectFlags::DEPTH)
            .expect("depth barrier");
        assert_eq!(depth.new_layout, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
        assert!(depth.src_stage.contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS));
        assert!(depth.src_access.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert!(depth.dst_stage.contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));

        assert_eq!(barriers(&without_depth).len(), 2);
        assert!(without_depth.iter().any(|c| matches!(
            c,
            Command::BeginRendering { depth_view: None, .. }
        )));
    }

    #[test]
    fn push_constant_is_view_projection_times_model() {
        let model = Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
        let view_projection = Mat4::from_scale(glam::Vec3::splat(2.0));

        let commands = record_frame(&target(true), &binding(), &[draw(36, model)], view_projection, [0.0; 4]);

        let pushed = commands
            .iter()
            .find_map(|c| match c {
                Command::PushTransform { matrix, .. } => Some(*matrix),
                _ => None,
            })
            .expect("push constant");
        assert_eq!(pushed, view_projection * model);
        assert!(commands.contains(&Command::DrawIndexed { index_count: 36 }));
    }

    #[test]
    fn every_draw_happens_inside_rendering_with_viewport_set() {
        let draws = [draw(6, Mat4::IDENTITY), draw(3, Mat4::IDENTITY)];
        let commands = record_frame(&target(true), &binding(), &draws, Mat4::IDENTITY, [0.0; 4]);

        let begin = commands.iter().position(|c| matches!(c, Command::BeginRendering { .. })).unwrap();
        let viewport = commands.iter().position(|c| matches!(c, Command::SetViewportScissor(_))).unwrap();
        let end = commands.iter().position(|c| matches!(c, Command::EndRendering)).unwrap();
        let draw_positions: Vec<usize> = commands
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, Command::DrawIndexed { .. }))
            .map(|(i, _)| i)
            .collect();

        assert_eq!(draw_positions.len(), 2);
        assert!(begin < viewport);
        assert!(draw_positions.iter().all(|&i| viewport < i && i < end));
    }

    #[test]
    fn image_upload_is_transition_copy_transition() {
        let staging = vk::Buffer::from_raw(5);
        let image = vk::Image::from_raw(6);
        let extent = vk::Extent2D { width: 1, height: 1 };

        let commands = record_image_upload(staging, image, extent);

        assert_eq!(commands.len(), 3);
        let layouts: Vec<_> = barriers(&commands).iter().map(|b| (b.old_layout, b.new_layout)).collect();
        assert_eq!(
            layouts,
            vec![
                (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
                (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            ]
        );
        assert_eq!(commands[1], Command::CopyBufferToImage { buffer: staging, image, extent });
    }
}
