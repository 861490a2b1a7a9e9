//! End-to-end context tests on the headless device.
//!
//! These drive the full bookkeeping layer (handles, heap placement,
//! descriptor slots, state tracking, frame pacing) through the same code
//! paths the Vulkan backend uses in production.

use glam::UVec2;
use lumen_rhi::context::RenderContext;
use lumen_rhi::device::GpuDevice;
use lumen_rhi::handle::Handle;
use lumen_rhi::null::{NullDevice, Op};
use lumen_rhi::types::{
    BufferDesc, BufferKind, ColorAttachment, ContextConfig, LoadOp, QueueKind, RenderPassDesc,
    StoreOp, FRAME_COUNT,
};
use lumen_rhi::RhiError;

const SIZE: UVec2 = UVec2::new(640, 480);

fn small_config() -> ContextConfig {
    ContextConfig {
        buffer_heap_size: 1 << 16,
        texture_heap_size: 1 << 24,
        upload_heap_size: 1 << 16,
        readback_heap_size: 1 << 16,
        view_descriptor_count: 64,
        render_descriptor_count: 16,
        depth_descriptor_count: 4,
    }
}

fn context() -> RenderContext<NullDevice> {
    RenderContext::new(NullDevice::new(SIZE), small_config(), SIZE)
        .expect("context creation on the null device cannot fail")
}

fn buffer_desc(kind: BufferKind, element_count: u64, stride: u64) -> BufferDesc {
    BufferDesc {
        kind,
        first_element: 0,
        element_count,
        stride,
        resource: Handle::NULL,
    }
}

#[test]
fn upload_and_read_back_round_trips_bytes() {
    let mut ctx = context();

    // Three 12-byte vertices staged on the CPU.
    let payload: Vec<u8> = (0..36u8).collect();
    let staging = ctx
        .create_buffer(&buffer_desc(BufferKind::Staging, 3, 12), "staging")
        .unwrap();
    let storage = ctx
        .create_buffer(&buffer_desc(BufferKind::Storage, 3, 12), "vertices")
        .unwrap();
    let readback = ctx
        .create_buffer(&buffer_desc(BufferKind::Readback, 3, 12), "readback")
        .unwrap();

    let ptr = ctx.map_buffer(staging).unwrap();
    unsafe { std::ptr::copy_nonoverlapping(payload.as_ptr(), ptr, payload.len()) };
    ctx.unmap_buffer(staging);

    let cmd = ctx.create_command(QueueKind::Transfer, "upload").unwrap();
    ctx.begin_command(cmd).unwrap();
    ctx.copy_buffer(cmd, staging, 0, storage, 0, 36).unwrap();
    ctx.copy_buffer(cmd, storage, 0, readback, 0, 36).unwrap();
    ctx.end_command(cmd).unwrap();
    ctx.one_time_submit(&[cmd], QueueKind::Transfer).unwrap();

    assert_eq!(ctx.fence_value(QueueKind::Transfer), 1);
    assert_eq!(ctx.device().submit_count(QueueKind::Transfer), 1);

    let ptr = ctx.map_buffer(readback).unwrap();
    let bytes = unsafe { std::slice::from_raw_parts(ptr, 36) };
    assert_eq!(bytes, &payload[..]);
    ctx.unmap_buffer(readback);
}

#[test]
fn device_local_buffers_cannot_be_mapped() {
    let mut ctx = context();
    let storage = ctx
        .create_buffer(&buffer_desc(BufferKind::Storage, 4, 16), "storage")
        .unwrap();
    assert!(matches!(
        ctx.map_buffer(storage),
        Err(RhiError::NotMappable(BufferKind::Storage))
    ));
}

#[test]
fn destroyed_buffers_release_their_descriptor_slot() {
    let mut ctx = context();
    let a = ctx
        .create_buffer(&buffer_desc(BufferKind::Storage, 4, 16), "a")
        .unwrap();
    let b = ctx
        .create_buffer(&buffer_desc(BufferKind::Storage, 4, 16), "b")
        .unwrap();
    let a_index = ctx.buffer_gpu_index(a);
    assert_ne!(a_index, ctx.buffer_gpu_index(b));

    ctx.destroy_buffer(a).unwrap();
    // The stale handle's view is no longer live.
    assert!(matches!(
        ctx.destroy_buffer(a),
        Err(RhiError::DescriptorNotLive { .. })
    ));

    // The freed slot is reused most-recent-first.
    let c = ctx
        .create_buffer(&buffer_desc(BufferKind::Storage, 4, 16), "c")
        .unwrap();
    assert_eq!(ctx.buffer_gpu_index(c), a_index);
}

#[test]
fn clear_frame_records_expected_barriers_and_presents() {
    let mut ctx = context();
    let frame = ctx.frame_data();
    let clear = [0.392, 0.584, 0.929, 1.0];

    ctx.begin_command(frame.command).unwrap();
    ctx.setup_graphics_command(frame.command).unwrap();
    ctx.begin_render_pass(
        frame.command,
        &RenderPassDesc {
            colors: vec![ColorAttachment {
                target: frame.render_target,
                load: LoadOp::Clear,
                store: StoreOp::Store,
                clear,
            }],
            depth: None,
        },
    )
    .unwrap();
    ctx.end_render_pass(frame.command).unwrap();
    ctx.end_command(frame.command).unwrap();
    ctx.submit(&[frame.command], QueueKind::Graphics).unwrap();

    // Common -> RenderTarget at pass begin, RenderTarget -> Present at end.
    let raw = ctx.device();
    let ops = raw.recorded_ops(lumen_rhi::device::RawCommand(frame.command.index() as u64));
    assert!(ops.contains(&Op::BindGlobals));
    assert!(ops.iter().any(|op| matches!(
        op,
        Op::BeginPass {
            colors: 1,
            has_depth: false,
            clear: Some(c)
        } if *c == clear
    )));
    assert_eq!(
        raw.barrier_count(lumen_rhi::device::RawCommand(frame.command.index() as u64)),
        2
    );

    let before = ctx.fence_value(QueueKind::Graphics);
    ctx.present().unwrap();
    assert_eq!(ctx.fence_value(QueueKind::Graphics), before + 1);
    assert_eq!(ctx.device().present_count(), 1);
}

#[test]
fn frame_pacing_never_outruns_the_fence() {
    let mut ctx = context();

    for n in 0..10 {
        assert_eq!(ctx.frame_index(), n % FRAME_COUNT);
        let frame = ctx.frame_data();
        ctx.begin_command(frame.command).unwrap();
        ctx.end_command(frame.command).unwrap();
        ctx.submit(&[frame.command], QueueKind::Graphics).unwrap();
        ctx.present().unwrap();

        let signaled = ctx.fence_value(QueueKind::Graphics);
        let completed = ctx.device().completed_value(QueueKind::Graphics);
        assert!(signaled - completed <= FRAME_COUNT as u64);
    }
    assert_eq!(ctx.device().present_count(), 10);
}

#[test]
fn frame_pacing_blocks_when_the_gpu_falls_behind() {
    // Completion trails signals by more than the frame ring, so the
    // scheduler must hit its blocking branch to keep the invariant.
    let device = NullDevice::with_fence_lag(SIZE, FRAME_COUNT as u64 + 1);
    let mut ctx = RenderContext::new(device, small_config(), SIZE).unwrap();

    for _ in 0..10 {
        let frame = ctx.frame_data();
        ctx.begin_command(frame.command).unwrap();
        ctx.end_command(frame.command).unwrap();
        ctx.submit(&[frame.command], QueueKind::Graphics).unwrap();
        ctx.present().unwrap();

        let signaled = ctx.fence_value(QueueKind::Graphics);
        let completed = ctx.device().completed_value(QueueKind::Graphics);
        assert!(signaled - completed <= FRAME_COUNT as u64);
    }
    assert!(ctx.device().blocking_wait_count(QueueKind::Graphics) > 0);
}

#[test]
fn resize_rebuilds_every_backbuffer_target() {
    let mut ctx = context();

    // Run a couple of frames first so resize happens mid-flight.
    for _ in 0..2 {
        let frame = ctx.frame_data();
        ctx.begin_command(frame.command).unwrap();
        ctx.end_command(frame.command).unwrap();
        ctx.submit(&[frame.command], QueueKind::Graphics).unwrap();
        ctx.present().unwrap();
    }

    let old_targets: Vec<_> = (0..FRAME_COUNT)
        .map(|i| ctx.frame_data_at(i).render_target)
        .collect();
    let old_commands: Vec<_> = (0..FRAME_COUNT)
        .map(|i| ctx.frame_data_at(i).command)
        .collect();

    let new_size = UVec2::new(1024, 768);
    ctx.resize(new_size).unwrap();

    assert_eq!(ctx.size(), new_size);
    // The null device reports backbuffer 0 after a resize.
    assert_eq!(ctx.frame_index(), 0);
    for i in 0..FRAME_COUNT {
        let frame = ctx.frame_data_at(i);
        assert!(!old_targets.contains(&frame.render_target));
        // Command lists survive the resize.
        assert_eq!(frame.command, old_commands[i]);
        assert_eq!(frame.fence_value, 0);
    }

    // The context keeps rendering after the resize.
    let frame = ctx.frame_data();
    ctx.begin_command(frame.command).unwrap();
    ctx.end_command(frame.command).unwrap();
    ctx.submit(&[frame.command], QueueKind::Graphics).unwrap();
    ctx.present().unwrap();
}

#[test]
fn command_state_machine_rejects_misuse() {
    let mut ctx = context();
    let cmd = ctx.create_command(QueueKind::Graphics, "state test").unwrap();

    // Submitting an idle command is an error.
    assert!(matches!(
        ctx.submit(&[cmd], QueueKind::Graphics),
        Err(RhiError::CommandState { .. })
    ));

    ctx.begin_command(cmd).unwrap();
    // Beginning twice is an error.
    assert!(matches!(
        ctx.begin_command(cmd),
        Err(RhiError::CommandState { .. })
    ));

    ctx.end_command(cmd).unwrap();
    ctx.submit(&[cmd], QueueKind::Graphics).unwrap();
    // After submission the list can be re-begun.
    ctx.begin_command(cmd).unwrap();
    ctx.end_command(cmd).unwrap();
}

#[test]
fn push_constant_budget_is_enforced() {
    let mut ctx = context();
    let cmd = ctx.create_command(QueueKind::Graphics, "push").unwrap();
    ctx.begin_command(cmd).unwrap();
    ctx.push_constants(cmd, &[0u32; 32]).unwrap();
    assert!(matches!(
        ctx.push_constants(cmd, &[0u32; 33]),
        Err(RhiError::PushConstantOverflow(33, 32))
    ));
}

#[test]
fn render_target_limit_is_enforced() {
    let mut ctx = context();
    let frame = ctx.frame_data();
    ctx.begin_command(frame.command).unwrap();

    let colors = vec![
        ColorAttachment {
            target: frame.render_target,
            load: LoadOp::Clear,
            store: StoreOp::Store,
            clear: [0.0; 4],
        };
        9
    ];
    assert!(matches!(
        ctx.begin_render_pass(frame.command, &RenderPassDesc { colors, depth: None }),
        Err(RhiError::TooManyRenderTargets(9, 8))
    ));
}

#[test]
fn redundant_transitions_are_elided() {
    let mut ctx = context();
    let frame = ctx.frame_data();
    let raw_cmd = lumen_rhi::device::RawCommand(frame.command.index() as u64);

    ctx.begin_command(frame.command).unwrap();
    ctx.begin_render_pass(
        frame.command,
        &RenderPassDesc {
            colors: vec![ColorAttachment {
                target: frame.render_target,
                load: LoadOp::Clear,
                store: StoreOp::Store,
                clear: [0.0; 4],
            }],
            depth: None,
        },
    )
    .unwrap();
    ctx.end_render_pass(frame.command).unwrap();
    let after_pass = ctx.device().barrier_count(raw_cmd);

    // A second pass over the same target needs no new barrier.
    ctx.begin_render_pass(
        frame.command,
        &RenderPassDesc {
            colors: vec![ColorAttachment {
                target: frame.render_target,
                load: LoadOp::Load,
                store: StoreOp::Store,
                clear: [0.0; 4],
            }],
            depth: None,
        },
    )
    .unwrap();
    ctx.end_render_pass(frame.command).unwrap();
    assert_eq!(ctx.device().barrier_count(raw_cmd), after_pass);
}
