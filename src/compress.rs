//! Attribute quantization pass.
//!
//! Vertex attributes are rewritten into `KHR_mesh_quantization` storage. A
//! [`GeometryCompressor`] only plans the rewrite; the plan is committed to the
//! document once it is complete, so a failing compressor leaves the document
//! exactly as it was.

use std::collections::HashSet;

use serde::Serialize;

use crate::document::{
    Accessor, AccessorData, Document, ElementType, Handle, Mesh, Node, NodeTransform, Semantic,
};
use crate::error::{Error, Pass, Result};
use crate::settings::OptimizationSettings;

pub const KHR_MESH_QUANTIZATION: &str = "KHR_mesh_quantization";

/// Requested levels above this are clamped; higher settings corrupt some
/// attribute layouts.
pub const MAX_LEVEL: u8 = 7;

const POSITION_FLOOR: u8 = 10;
const TEXCOORD_FLOOR: u8 = 10;
const NORMAL_FLOOR: u8 = 8;
const COLOR_FLOOR: u8 = 8;
const GENERIC_FLOOR: u8 = 8;

/// Bit depth per attribute class, derived from the compression level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantizationParams {
    /// Level after clamping.
    pub level: u8,
    pub position_bits: u8,
    pub normal_bits: u8,
    pub texcoord_bits: u8,
    pub color_bits: u8,
    pub generic_bits: u8,
}

impl QuantizationParams {
    pub fn for_level(requested: u8) -> Self {
        let level = requested.min(MAX_LEVEL);
        let bits = |floor: u8| floor.max(16u8.saturating_sub(level));
        Self {
            level,
            position_bits: bits(POSITION_FLOOR),
            normal_bits: bits(NORMAL_FLOOR),
            texcoord_bits: bits(TEXCOORD_FLOOR),
            color_bits: bits(COLOR_FLOOR),
            generic_bits: bits(GENERIC_FLOOR),
        }
    }
}

/// Uniform dequantization folded into a node: `p = offset + scale * q`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dequantize {
    pub offset: [f32; 3],
    pub scale: f32,
}

#[derive(Debug, Clone)]
pub struct AttributeRewrite {
    pub mesh: Handle<Mesh>,
    pub primitive: usize,
    pub semantic: Semantic,
    pub accessor: Accessor,
}

/// Everything a compressor wants changed, applied all at once.
#[derive(Debug, Clone, Default)]
pub struct CompressionPlan {
    pub attributes: Vec<AttributeRewrite>,
    pub dequantize: Vec<(Handle<Mesh>, Dequantize)>,
    /// Whether the rewrite leaves core glTF storage types.
    pub requires_extension: bool,
}

pub trait GeometryCompressor {
    fn name(&self) -> &str;

    /// Computes the rewrite without touching `doc`.
    fn plan(&self, doc: &Document, params: &QuantizationParams) -> Result<CompressionPlan>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionReport {
    pub enabled: bool,
    pub params: Option<QuantizationParams>,
    pub accessors_quantized: usize,
    pub meshes_requantized: usize,
    /// Set when the compressor failed and the document was left as is.
    pub error: Option<String>,
}

/// Runs the default [`MeshQuantizer`] when compression is enabled.
pub fn compress(doc: &mut Document, settings: &OptimizationSettings) -> CompressionReport {
    compress_with(doc, settings, &MeshQuantizer)
}

pub fn compress_with(
    doc: &mut Document,
    settings: &OptimizationSettings,
    compressor: &dyn GeometryCompressor,
) -> CompressionReport {
    if !settings.draco_compression.enabled {
        return CompressionReport::default();
    }
    let requested = settings.draco_compression.level;
    let params = QuantizationParams::for_level(requested);
    if params.level != requested {
        log::info!("compression level {requested} clamped to {}", params.level);
    }

    let mut report = CompressionReport {
        enabled: true,
        params: Some(params),
        ..Default::default()
    };
    match compressor.plan(doc, &params) {
        Ok(plan) => {
            report.accessors_quantized = plan.attributes.len();
            report.meshes_requantized = plan.dequantize.len();
            commit(doc, plan);
            log::info!(
                "{}: quantized {} accessors in {} position frames",
                compressor.name(),
                report.accessors_quantized,
                report.meshes_requantized
            );
        }
        Err(e) => {
            log::warn!("{} failed, keeping uncompressed geometry: {e}", compressor.name());
            report.error = Some(e.to_string());
        }
    }
    report
}

fn commit(doc: &mut Document, plan: CompressionPlan) {
    for rewrite in plan.attributes {
        let handle = doc.accessors.insert(rewrite.accessor);
        if let Some(primitive) = doc
            .meshes
            .get_mut(rewrite.mesh)
            .and_then(|m| m.primitives.get_mut(rewrite.primitive))
        {
            primitive.attributes.insert(rewrite.semantic, handle);
        }
    }

    for (mesh, dequantize) in plan.dequantize {
        let owners: Vec<Handle<Node>> = doc
            .nodes
            .iter()
            .filter(|(_, node)| node.mesh == Some(mesh))
            .map(|(handle, _)| handle)
            .collect();
        for owner in owners {
            let child = doc.nodes.insert(Node {
                name: doc.nodes[owner].name.as_ref().map(|n| format!("{n}_dequantized")),
                transform: NodeTransform::Trs {
                    translation: dequantize.offset,
                    rotation: [0.0, 0.0, 0.0, 1.0],
                    scale: [dequantize.scale; 3],
                },
                mesh: Some(mesh),
                ..Default::default()
            });
            let node = &mut doc.nodes[owner];
            node.mesh = None;
            node.children.push(child);
        }
    }

    if plan.requires_extension {
        doc.add_extension(KHR_MESH_QUANTIZATION, true);
    }
}

fn snapped(value: f32, bits: u8, storage_max: f32) -> f32 {
    let grid = ((1u32 << (bits - 1)) - 1) as f32;
    (value * grid).round() / grid * storage_max
}

/// Signed normalized storage for values in [-1, 1].
fn quantize_signed(values: &[f32], bits: u8) -> AccessorData {
    if bits <= 8 {
        AccessorData::I8(
            values
                .iter()
                .map(|&v| (v.clamp(-1.0, 1.0) * 127.0).round() as i8)
                .collect(),
        )
    } else {
        AccessorData::I16(
            values
                .iter()
                .map(|&v| snapped(v.clamp(-1.0, 1.0), bits, 32767.0).round() as i16)
                .collect(),
        )
    }
}

/// Unsigned normalized storage for values in [0, 1].
fn quantize_unsigned(values: &[f32], bits: u8) -> AccessorData {
    if bits <= 8 {
        AccessorData::U8(
            values
                .iter()
                .map(|&v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
                .collect(),
        )
    } else {
        let grid = ((1u32 << bits) - 1) as f32;
        AccessorData::U16(
            values
                .iter()
                .map(|&v| ((v.clamp(0.0, 1.0) * grid).round() / grid * 65535.0).round() as u16)
                .collect(),
        )
    }
}

fn normalized(element_type: ElementType, data: AccessorData) -> Accessor {
    let mut accessor = Accessor::new(element_type, data);
    accessor.normalized = true;
    accessor
}

fn within(values: &[f32], lo: f32, hi: f32) -> bool {
    values.iter().all(|v| (lo..=hi).contains(v))
}

/// Quantizes float attributes to integer storage at the planned bit depths.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshQuantizer;

impl MeshQuantizer {
    /// Meshes whose positions can move into a per-node dequantization frame.
    fn position_frame(
        doc: &Document,
        mesh: Handle<Mesh>,
        pinned: &HashSet<Handle<Mesh>>,
        bits: u8,
    ) -> Result<Option<Dequantize>> {
        if pinned.contains(&mesh) {
            return Ok(None);
        }
        let mut min = [f32::INFINITY; 3];
        let mut max = [f32::NEG_INFINITY; 3];
        for primitive in &doc.meshes[mesh].primitives {
            if !primitive.targets.is_empty() {
                return Ok(None);
            }
            let Some(position) = primitive.position() else {
                return Ok(None);
            };
            let accessor = &doc.accessors[position];
            if !accessor.data.is_float() {
                return Ok(None);
            }
            for p in accessor.read_f32().chunks_exact(3) {
                for c in 0..3 {
                    if !p[c].is_finite() {
                        return Err(Error::pass(
                            Pass::Compression,
                            format!("non-finite position in mesh {mesh:?}"),
                        ));
                    }
                    min[c] = min[c].min(p[c]);
                    max[c] = max[c].max(p[c]);
                }
            }
        }
        if min[0] > max[0] {
            return Ok(None);
        }
        let extent = (0..3).map(|c| max[c] - min[c]).fold(0.0f32, f32::max);
        let levels = ((1u32 << bits) - 1) as f32;
        let scale = if extent > 0.0 { extent / levels } else { 1.0 };
        Ok(Some(Dequantize { offset: min, scale }))
    }
}

impl GeometryCompressor for MeshQuantizer {
    fn name(&self) -> &str {
        "mesh quantizer"
    }

    fn plan(&self, doc: &Document, params: &QuantizationParams) -> Result<CompressionPlan> {
        // Skinned meshes must stay on the node carrying the skin.
        let pinned: HashSet<Handle<Mesh>> = doc
            .nodes
            .iter()
            .filter(|(_, node)| node.skin.is_some())
            .filter_map(|(_, node)| node.mesh)
            .collect();

        let mut plan = CompressionPlan::default();
        for (mesh, content) in doc.meshes.iter() {
            let frame = Self::position_frame(doc, mesh, &pinned, params.position_bits)?;
            if let Some(frame) = frame {
                plan.dequantize.push((mesh, frame));
                plan.requires_extension = true;
            }

            for (index, primitive) in content.primitives.iter().enumerate() {
                for (semantic, &handle) in &primitive.attributes {
                    let accessor = &doc.accessors[handle];
                    if !accessor.data.is_float() {
                        continue;
                    }
                    let values = accessor.read_f32();
                    let element_type = accessor.element_type;
                    let quantized = match semantic {
                        Semantic::Positions => frame.map(|f| {
                            let levels = ((1u32 << params.position_bits) - 1) as f32;
                            let data = values
                                .chunks_exact(3)
                                .flat_map(|p| {
                                    (0..3).map(move |c| {
                                        ((p[c] - f.offset[c]) / f.scale).round().clamp(0.0, levels) as u16
                                    })
                                })
                                .collect();
                            Accessor::new(element_type, AccessorData::U16(data))
                        }),
                        Semantic::Normals | Semantic::Tangents => {
                            plan.requires_extension = true;
                            Some(normalized(element_type, quantize_signed(&values, params.normal_bits)))
                        }
                        Semantic::TexCoords(_) if within(&values, 0.0, 1.0) => Some(normalized(
                            element_type,
                            quantize_unsigned(&values, params.texcoord_bits),
                        )),
                        Semantic::Colors(_) => Some(normalized(
                            element_type,
                            quantize_unsigned(&values, params.color_bits),
                        )),
                        Semantic::Extras(name) if name.starts_with('_') && within(&values, -1.0, 1.0) => {
                            Some(normalized(element_type, quantize_signed(&values, params.generic_bits)))
                        }
                        _ => None,
                    };
                    if let Some(mut accessor) = quantized {
                        accessor.name = doc.accessors[handle].name.clone();
                        plan.attributes.push(AttributeRewrite {
                            mesh,
                            primitive: index,
                            semantic: semantic.clone(),
                            accessor,
                        });
                    }
                }
            }
        }
        Ok(plan)
    }
}
