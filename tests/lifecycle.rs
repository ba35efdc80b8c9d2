// Initialization failures, resource accounting and teardown order

mod common;

use std::collections::{HashMap, HashSet};

use ash::vk;
use glam::Mat4;
use vk_engine::adapter::{AdapterFeatures, AdapterInfo, QueueFamilyInfo};
use vk_engine::gpu::GpuHandle;
use vk_engine::{Engine, EngineError, NullGpu, NullGpuConfig, SceneAssets, TextureData};

fn counts(handles: &[GpuHandle]) -> HashMap<GpuHandle, usize> {
    let mut counts = HashMap::new();
    for handle in handles {
        *counts.entry(*handle).or_insert(0) += 1;
    }
    counts
}

fn run_frames(engine: &mut Engine<NullGpu>, frames: usize) {
    for _ in 0..frames {
        engine.draw_frame(Mat4::IDENTITY, Mat4::IDENTITY).unwrap();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Accounting
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn every_created_object_is_destroyed_exactly_once() {
    let (_dir, config) = common::shader_fixture();
    let gpu = NullGpu::new();
    let mut engine = Engine::init(gpu.clone(), &config, (800, 600), &SceneAssets::builtin()).unwrap();

    run_frames(&mut engine, 3);
    gpu.resize_surface(640, 480);
    engine.resize(640, 480);
    run_frames(&mut engine, 3);
    engine.cleanup().unwrap();

    assert!(gpu.live_handles().is_empty());
    let created = counts(&gpu.created_handles());
    let destroyed = counts(&gpu.destroyed_handles());
    assert!(created.values().all(|&n| n == 1));
    assert_eq!(created, destroyed);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
}

#[test]
fn teardown_list_holds_each_live_object_once() {
    let (_dir, config) = common::shader_fixture();
    let gpu = NullGpu::new();
    let mut engine = Engine::init(gpu.clone(), &config, (800, 600), &SceneAssets::builtin()).unwrap();

    let check = |engine: &Engine<NullGpu>| {
        let listed = engine.teardown_handles();
        let unique: HashSet<GpuHandle> = listed.iter().copied().collect();
        assert_eq!(unique.len(), listed.len());
        assert_eq!(counts(&listed), counts(&gpu.live_handles()));
    };

    check(&engine);
    run_frames(&mut engine, 2);
    gpu.invalidate_swapchains();
    run_frames(&mut engine, 2);
    check(&engine);

    let memory_backed = engine
        .teardown_handles()
        .iter()
        .filter(|h| matches!(h, GpuHandle::Buffer(_) | GpuHandle::Image(_)))
        .count();
    assert_eq!(engine.live_allocations(), memory_backed);

    engine.cleanup().unwrap();
}

#[test]
fn cleanup_runs_in_reverse_acquisition_order() {
    let (_dir, config) = common::shader_fixture();
    let gpu = NullGpu::new();
    let mut engine = Engine::init(gpu.clone(), &config, (800, 600), &SceneAssets::builtin()).unwrap();
    run_frames(&mut engine, 4);

    let acquired = engine.teardown_handles();
    let destroyed_before = gpu.destroyed_handles().len();
    engine.cleanup().unwrap();

    let destroyed = gpu.destroyed_handles();
    let mut expected = acquired;
    expected.reverse();
    assert_eq!(&destroyed[destroyed_before..], expected.as_slice());
}

#[test]
fn staging_buffer_and_shader_modules_do_not_outlive_init() {
    let (_dir, config) = common::shader_fixture();
    let gpu = NullGpu::new();
    let engine = Engine::init(gpu.clone(), &config, (800, 600), &SceneAssets::builtin()).unwrap();

    let destroyed = gpu.destroyed_handles();
    assert_eq!(
        destroyed.iter().filter(|h| matches!(h, GpuHandle::ShaderModule(_))).count(),
        2
    );
    assert_eq!(destroyed.iter().filter(|h| matches!(h, GpuHandle::Buffer(_))).count(), 1);
    assert_eq!(gpu.one_shot_submissions(), 1);

    engine.cleanup().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Fatal paths
// ─────────────────────────────────────────────────────────────────────────────

fn adapter(features: AdapterFeatures, present: bool) -> AdapterInfo {
    AdapterInfo {
        name: "Test GPU".to_string(),
        device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
        queue_families: vec![QueueFamilyInfo {
            graphics: true,
            present,
        }],
        features,
    }
}

#[test]
fn no_adapter_is_fatal() {
    let result = NullGpu::bootstrap(NullGpuConfig {
        adapters: Vec::new(),
        ..NullGpuConfig::default()
    });

    assert!(matches!(result, Err(EngineError::NoAdapter)));
}

#[test]
fn missing_feature_is_fatal() {
    let features = AdapterFeatures {
        dynamic_rendering: false,
        ..AdapterFeatures::ALL
    };

    let result = NullGpu::bootstrap(NullGpuConfig {
        adapters: vec![adapter(features, true)],
        ..NullGpuConfig::default()
    });

    assert!(matches!(result, Err(EngineError::MissingFeature("dynamicRendering"))));
}

#[test]
fn missing_present_queue_is_fatal() {
    let result = NullGpu::bootstrap(NullGpuConfig {
        adapters: vec![adapter(AdapterFeatures::ALL, false)],
        ..NullGpuConfig::default()
    });

    assert!(matches!(result, Err(EngineError::QueueFamilyMissing(_))));
}

#[test]
fn integrated_adapter_is_accepted_as_fallback() {
    let gpu = NullGpu::bootstrap(NullGpuConfig {
        adapters: vec![adapter(AdapterFeatures::ALL, true)],
        ..NullGpuConfig::default()
    })
    .unwrap();

    assert_eq!(vk_engine::Gpu::adapter_name(&gpu), "Test GPU");
}

#[test]
fn missing_shader_blob_leaves_nothing_alive() {
    let (dir, mut config) = common::shader_fixture();
    config.fragment_shader = dir.path().join("missing.frag.spv");
    let gpu = NullGpu::new();

    let result = Engine::init(gpu.clone(), &config, (800, 600), &SceneAssets::builtin());

    match result {
        Err(EngineError::ShaderBlob { path, .. }) => assert_eq!(path, config.fragment_shader),
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("init succeeded without a fragment shader"),
    }
    assert!(gpu.live_handles().is_empty());
    assert!(!gpu.created_handles().is_empty());
}

#[test]
fn truncated_shader_blob_is_rejected() {
    let (dir, config) = common::shader_fixture();
    common::write(&config.vertex_shader, &common::spirv_blob()[..6]);
    let gpu = NullGpu::new();

    let result = Engine::init(gpu.clone(), &config, (800, 600), &SceneAssets::builtin());

    assert!(matches!(result, Err(EngineError::ShaderBlob { .. })));
    assert!(gpu.live_handles().is_empty());
    drop(dir);
}

#[test]
fn blob_without_spirv_magic_is_rejected() {
    let (_dir, config) = common::shader_fixture();
    common::write(&config.vertex_shader, &[0u8; 16]);
    let gpu = NullGpu::new();

    let result = Engine::init(gpu.clone(), &config, (800, 600), &SceneAssets::builtin());

    assert!(matches!(result, Err(EngineError::ShaderBlob { .. })));
    assert!(gpu.live_handles().is_empty());
}

#[test]
fn bad_texture_fails_init_cleanly() {
    let (_dir, config) = common::shader_fixture();
    let gpu = NullGpu::new();
    let assets = SceneAssets {
        texture: TextureData {
            width: 2,
            height: 2,
            pixels: vec![0; 4],
        },
        ..SceneAssets::builtin()
    };

    let result = Engine::init(gpu.clone(), &config, (800, 600), &assets);

    assert!(matches!(result, Err(EngineError::InvalidUpload(_))));
    assert!(gpu.live_handles().is_empty());
}
