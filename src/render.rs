//! Instance buffer construction for batched drawing.
//!
//! The render bridge turns entity state into one [`InstanceRecord`] per live
//! balloon, in ascending slot order, so that a consumer can draw the whole
//! population with a single instanced call keyed by [`RenderBridge::count`].
//! Destroyed slots never produce a record.
//!
//! # Layout
//!
//! Records are `#[repr(C)]` and [`Pod`], 96 bytes each, and can be uploaded
//! as-is with [`RenderBridge::as_bytes`]:
//!
//! | Offset | Field | Contents |
//! |--------|-------|----------|
//! | 0  | `transform` | column-major model matrix (translation, rotation, squash, radius) |
//! | 64 | `color` | base colour RGB, alpha = 1 - transparency |
//! | 80 | `material` | metallic, roughness, transparency, lifecycle state |

use crate::entity::{BalloonParams, BalloonState, Body, EntityStore, Material, Vitals};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use rayon::prelude::*;

/// Per-instance data consumed by the draw call.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct InstanceRecord {
    pub transform: [[f32; 4]; 4],
    pub color: [f32; 4],
    pub material: [f32; 4],
}

impl InstanceRecord {
    /// Byte size of one record.
    pub const SIZE: usize = std::mem::size_of::<InstanceRecord>();

    /// Build the record for one balloon.
    pub fn from_entity(body: &Body, params: &BalloonParams, material: &Material, vitals: &Vitals) -> Self {
        let transform = Mat4::from_translation(body.position)
            * Mat4::from_quat(body.orientation)
            * Mat4::from_mat3(vitals.deformation())
            * Mat4::from_scale(Vec3::splat(params.radius));
        let opacity = (1.0 - material.transparency).clamp(0.0, 1.0);
        Self {
            transform: transform.to_cols_array_2d(),
            color: material.base_color.extend(opacity).to_array(),
            material: [
                material.metallic,
                material.roughness,
                material.transparency,
                state_code(vitals.state),
            ],
        }
    }

    /// World-space centre of the instance.
    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.transform[3][0], self.transform[3][1], self.transform[3][2])
    }
}

#[inline]
fn state_code(state: BalloonState) -> f32 {
    match state {
        BalloonState::Normal => 0.0,
        BalloonState::Deforming => 1.0,
        BalloonState::Bursting => 2.0,
        BalloonState::Destroyed => 3.0,
    }
}

/// Rebuilds the instance buffer once per tick.
#[derive(Debug, Default)]
pub struct RenderBridge {
    records: Vec<InstanceRecord>,
    /// Slot index of each record.
    slots: Vec<u32>,
}

impl RenderBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the store. Returns the number of records.
    pub fn build(&mut self, store: &EntityStore) -> usize {
        self.build_from(store.bodies(), store.params(), store.materials(), store.vitals())
    }

    /// Rebuild from raw per-slot arrays. Slots whose state is
    /// [`BalloonState::Destroyed`] are skipped.
    pub fn build_from(
        &mut self,
        bodies: &[Body],
        params: &[BalloonParams],
        materials: &[Material],
        vitals: &[Vitals],
    ) -> usize {
        self.records.clear();
        self.slots.clear();
        let (records, slots): (Vec<InstanceRecord>, Vec<u32>) = bodies
            .par_iter()
            .zip(params.par_iter())
            .zip(materials.par_iter())
            .zip(vitals.par_iter())
            .enumerate()
            .filter(|(_, (_, v))| v.is_live())
            .map(|(i, (((b, p), m), v))| (InstanceRecord::from_entity(b, p, m, v), i as u32))
            .unzip();
        self.records = records;
        self.slots = slots;
        self.records.len()
    }

    /// Records in slot order.
    #[inline]
    pub fn records(&self) -> &[InstanceRecord] {
        &self.records
    }

    /// Slot index for each record.
    #[inline]
    pub fn slots(&self) -> &[u32] {
        &self.slots
    }

    /// Instance count for the draw call.
    #[inline]
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Raw bytes ready for upload.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.records)
    }
}

/// WGSL for drawing instance records as shaded sphere impostors.
///
/// Six vertices per instance form a camera-facing quad; the fragment stage
/// discards outside the unit disc and shades a sphere normal.
pub const INSTANCE_SHADER_WGSL: &str = r#"
struct Camera {
    view_proj: mat4x4<f32>,
    right: vec4<f32>,
    up: vec4<f32>,
    light_dir: vec4<f32>,
};

@group(0) @binding(0) var<uniform> camera: Camera;

struct InstanceInput {
    @location(0) m0: vec4<f32>,
    @location(1) m1: vec4<f32>,
    @location(2) m2: vec4<f32>,
    @location(3) m3: vec4<f32>,
    @location(4) color: vec4<f32>,
    @location(5) material: vec4<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
    @location(2) material: vec4<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32, instance: InstanceInput) -> VertexOutput {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, 1.0),
    );
    let corner = corners[vertex_index % 6u];

    // Squash and radius as seen along the camera axes.
    let linear = mat3x3<f32>(instance.m0.xyz, instance.m1.xyz, instance.m2.xyz);
    let right = camera.right.xyz * length(linear * camera.right.xyz);
    let up = camera.up.xyz * length(linear * camera.up.xyz);
    let world = instance.m3.xyz + right * corner.x + up * corner.y;

    var out: VertexOutput;
    out.clip_position = camera.view_proj * vec4<f32>(world, 1.0);
    out.uv = corner;
    out.color = instance.color;
    out.material = instance.material;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let r2 = dot(in.uv, in.uv);
    if (r2 > 1.0) {
        discard;
    }
    let normal = vec3<f32>(in.uv, sqrt(1.0 - r2));
    let light = normalize(camera.light_dir.xyz);
    let diffuse = max(dot(normal, light), 0.0);

    let metallic = in.material.x;
    let roughness = in.material.y;
    let halfway = normalize(light + vec3<f32>(0.0, 0.0, 1.0));
    let shininess = mix(64.0, 4.0, roughness);
    let specular = pow(max(dot(normal, halfway), 0.0), shininess) * mix(0.04, 1.0, metallic);

    let base = in.color.rgb * (0.25 + 0.75 * diffuse) * (1.0 - 0.5 * metallic);
    return vec4<f32>(base + vec3<f32>(specular), in.color.a);
}
"#;
