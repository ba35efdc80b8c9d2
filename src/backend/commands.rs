// Command pools, command buffers and the Command -> vkCmd* encoder

use ash::vk;

use super::VulkanDevice;
use crate::error::EngineResult;
use crate::recorder::{Command, ImageBarrier};

impl VulkanDevice {
    pub(super) fn new_command_pool(&self) -> EngineResult<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.queues.graphics);
        Ok(unsafe { self.device.create_command_pool(&create_info, None) }?)
    }

    pub(super) fn new_command_buffers(&self, pool: vk::CommandPool, count: u32) -> EngineResult<Vec<vk::CommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        Ok(unsafe { self.device.allocate_command_buffers(&allocate_info) }?)
    }

    /// Begin, encode every command, end.
    pub(super) fn encode(&self, command_buffer: vk::CommandBuffer, one_time: bool, commands: &[Command]) -> EngineResult<()> {
        let flags = if one_time {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);

        unsafe {
            self.device.begin_command_buffer(command_buffer, &begin_info)?;
            for command in commands {
                self.encode_one(command_buffer, command);
            }
            self.device.end_command_buffer(command_buffer)?;
        }
        Ok(())
    }

    unsafe fn encode_one(&self, cmd: vk::CommandBuffer, command: &Command) {
        let device = &self.device;
        match command {
            Command::Barrier(barrier) => self.encode_barrier(cmd, barrier),
            Command::BeginRendering {
                color_view,
                depth_view,
                extent,
                clear_color,
                clear_depth,
            } => {
                let color_attachments = [vk::RenderingAttachmentInfo::builder()
                    .image_view(*color_view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(vk::ClearValue {
                        color: vk::ClearColorValue { float32: *clear_color },
                    })
                    .build()];

                let depth_attachment = depth_view.map(|view| {
                    vk::RenderingAttachmentInfo::builder()
                        .image_view(view)
                        .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                        .load_op(vk::AttachmentLoadOp::CLEAR)
                        .store_op(vk::AttachmentStoreOp::DONT_CARE)
                        .clear_value(vk::ClearValue {
                            depth_stencil: vk::ClearDepthStencilValue {
                                depth: *clear_depth,
                                stencil: 0,
                            },
                        })
                        .build()
                });

                let mut rendering_info = vk::RenderingInfo::builder()
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent: *extent,
                    })
                    .layer_count(1)
                    .color_attachments(&color_attachments);
                if let Some(depth) = &depth_attachment {
                    rendering_info = rendering_info.depth_attachment(depth);
                }

                device.cmd_begin_rendering(cmd, &rendering_info);
            }
            Command::SetViewportScissor(extent) => {
                let viewport = vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: extent.width as f32,
                    height: extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                };
                let scissor = vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: *extent,
                };
                device.cmd_set_viewport(cmd, 0, &[viewport]);
                device.cmd_set_scissor(cmd, 0, &[scissor]);
            }
            Command::BindPipeline(pipeline) => {
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, *pipeline);
            }
            Command::BindDescriptorSet { layout, set } => {
                device.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::GRAPHICS, *layout, 0, &[*set], &[]);
            }
            Command::BindVertexBuffer(buffer) => {
                device.cmd_bind_vertex_buffers(cmd, 0, &[*buffer], &[0]);
            }
            Command::BindIndexBuffer(buffer) => {
                device.cmd_bind_index_buffer(cmd, *buffer, 0, vk::IndexType::UINT32);
            }
            Command::PushTransform { layout, matrix } => {
                device.cmd_push_constants(
                    cmd,
                    *layout,
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    bytemuck::bytes_of(matrix),
                );
            }
            Command::DrawIndexed { index_count } => {
                device.cmd_draw_indexed(cmd, *index_count, 1, 0, 0, 0);
            }
            Command::EndRendering => device.cmd_end_rendering(cmd),
            Command::CopyBufferToImage { buffer, image, extent } => {
                let region = vk::BufferImageCopy {
                    buffer_offset: 0,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                    image_extent: vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    },
                };
                device.cmd_copy_buffer_to_image(
                    cmd,
                    *buffer,
                    *image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
        }
    }

    unsafe fn encode_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
        let image_barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(barrier.old_layout)
            .new_layout(barrier.new_layout)
            .src_access_mask(barrier.src_access)
            .dst_access_mask(barrier.dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(barrier.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: barrier.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .build();

        self.device.cmd_pipeline_barrier(
            cmd,
            barrier.src_stage,
            barrier.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[image_barrier],
        );
    }
}
