// SPDX-License-Identifier: GPL-3.0-only
//! Filter catalog and shader sources
//!
//! Every filter is one fragment stage paired with the shared vertex stage in
//! `wgsl/common.wgsl`. The catalog is a pure mapping from filter id to the
//! program source and its uniform parameters; compiling and caching programs
//! is the job of whoever owns the rendering context.

use crate::gpu::{FilterUniforms, Mat4, ProgramSource};
use serde::{Deserialize, Serialize};

/// Shared uniform block, bindings and vertex stage
pub const COMMON_SHADER: &str = include_str!("wgsl/common.wgsl");

const IDENTITY_SHADER: &str = include_str!("wgsl/identity.wgsl");
const GRAYSCALE_SHADER: &str = include_str!("wgsl/grayscale.wgsl");
const SEPIA_SHADER: &str = include_str!("wgsl/sepia.wgsl");
const PURPLE_SHADER: &str = include_str!("wgsl/purple.wgsl");
const BEAUTY_SHADER: &str = include_str!("wgsl/beauty.wgsl");
const CONVOLUTION_SHADER: &str = include_str!("wgsl/convolution.wgsl");

/// Number of convolution kernel weights
pub const KERNEL_SIZE: usize = 9;

const KERNEL_SHARPEN: [f32; KERNEL_SIZE] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];
const KERNEL_EDGE_DETECT: [f32; KERNEL_SIZE] =
    [-1.0, -1.0, -1.0, -1.0, 8.0, -1.0, -1.0, -1.0, -1.0];
const KERNEL_EMBOSS: [f32; KERNEL_SIZE] = [2.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0];

/// Filter types for camera preview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    /// No filter applied
    #[default]
    Normal,
    /// Luma-weighted black & white
    Grayscale,
    /// Sepia tone
    Sepia,
    /// Purple channel mix
    Purple,
    /// Skin smoothing
    Beauty,
    /// 3x3 sharpen kernel
    Sharpen,
    /// 3x3 edge detect kernel
    EdgeDetect,
    /// 3x3 emboss kernel
    Emboss,
}

impl FilterType {
    pub const ALL: [FilterType; 8] = [
        FilterType::Normal,
        FilterType::Grayscale,
        FilterType::Sepia,
        FilterType::Purple,
        FilterType::Beauty,
        FilterType::Sharpen,
        FilterType::EdgeDetect,
        FilterType::Emboss,
    ];

    /// Stable identifier used in config files and on the command line
    pub fn id(&self) -> &'static str {
        match self {
            FilterType::Normal => "normal",
            FilterType::Grayscale => "grayscale",
            FilterType::Sepia => "sepia",
            FilterType::Purple => "purple",
            FilterType::Beauty => "beauty",
            FilterType::Sharpen => "sharpen",
            FilterType::EdgeDetect => "edge_detect",
            FilterType::Emboss => "emboss",
        }
    }

    /// Look up an identifier; unknown ids map to the identity filter
    pub fn from_id(id: &str) -> Self {
        let id = id.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.id().eq_ignore_ascii_case(id))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for FilterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Per-filter uniform parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterParams {
    None,
    /// Beauty level vector (hue, smooth, soft light, saturate)
    Level([f32; 4]),
    /// Convolution kernel and colour adjust
    Kernel {
        weights: [f32; KERNEL_SIZE],
        color_adjust: f32,
    },
}

/// Everything needed to build one filter program
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterDescriptor {
    pub filter: FilterType,
    pub label: &'static str,
    pub vertex: &'static str,
    pub fragment: &'static str,
    pub params: FilterParams,
}

impl FilterDescriptor {
    pub fn program_source(&self) -> ProgramSource<'static> {
        ProgramSource {
            label: self.label,
            vertex: self.vertex,
            fragment: self.fragment,
        }
    }

    /// Fill the uniform block for one draw
    ///
    /// `texel` is the size of one source texel in texture coordinates.
    pub fn uniforms(&self, mvp: Mat4, tex_matrix: Mat4, texel: [f32; 2]) -> FilterUniforms {
        let mut uniforms = FilterUniforms {
            mvp,
            tex_matrix,
            texel: [texel[0], texel[1], 0.0, 0.0],
            ..FilterUniforms::default()
        };
        match self.params {
            FilterParams::None => {}
            FilterParams::Level(level) => uniforms.level = level,
            FilterParams::Kernel {
                weights: k,
                color_adjust,
            } => {
                uniforms.kernel0 = [k[0], k[1], k[2], k[3]];
                uniforms.kernel1 = [k[4], k[5], k[6], k[7]];
                uniforms.kernel2 = [k[8], color_adjust, 0.0, 0.0];
            }
        }
        uniforms
    }
}

/// Beauty level vector for level 1-5; anything else gets the mildest setting
pub fn beauty_level(level: u8) -> [f32; 4] {
    match level {
        5 => [0.33, 0.63, 0.4, 0.35],
        4 => [0.4, 0.7, 0.38, 0.3],
        3 => [0.6, 0.8, 0.25, 0.25],
        2 => [0.8, 0.9, 0.2, 0.2],
        _ => [1.0, 1.0, 0.15, 0.15],
    }
}

/// Filter id to program descriptor mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterCatalog {
    beauty_level: u8,
}

impl Default for FilterCatalog {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_BEAUTY_LEVEL)
    }
}

impl FilterCatalog {
    pub fn new(beauty_level: u8) -> Self {
        Self { beauty_level }
    }

    pub fn descriptor(&self, filter: FilterType) -> FilterDescriptor {
        let (label, fragment, params) = match filter {
            FilterType::Normal => ("normal", IDENTITY_SHADER, FilterParams::None),
            FilterType::Grayscale => ("grayscale", GRAYSCALE_SHADER, FilterParams::None),
            FilterType::Sepia => ("sepia", SEPIA_SHADER, FilterParams::None),
            FilterType::Purple => ("purple", PURPLE_SHADER, FilterParams::None),
            FilterType::Beauty => (
                "beauty",
                BEAUTY_SHADER,
                FilterParams::Level(beauty_level(self.beauty_level)),
            ),
            FilterType::Sharpen => ("sharpen", CONVOLUTION_SHADER, kernel(KERNEL_SHARPEN, 0.0)),
            FilterType::EdgeDetect => (
                "edge_detect",
                CONVOLUTION_SHADER,
                kernel(KERNEL_EDGE_DETECT, 0.0),
            ),
            FilterType::Emboss => ("emboss", CONVOLUTION_SHADER, kernel(KERNEL_EMBOSS, 0.5)),
        };
        FilterDescriptor {
            filter,
            label,
            vertex: COMMON_SHADER,
            fragment,
            params,
        }
    }

    /// Descriptor for a textual id, falling back to the identity filter
    pub fn lookup(&self, id: &str) -> FilterDescriptor {
        self.descriptor(FilterType::from_id(id))
    }
}

fn kernel(weights: [f32; KERNEL_SIZE], color_adjust: f32) -> FilterParams {
    FilterParams::Kernel {
        weights,
        color_adjust,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::matrix::IDENTITY;

    #[test]
    fn test_unknown_id_is_identity() {
        let catalog = FilterCatalog::default();
        assert_eq!(catalog.lookup("starmaker").filter, FilterType::Normal);
        assert_eq!(catalog.lookup("").fragment, IDENTITY_SHADER);
        assert_eq!(catalog.lookup(" Sepia ").filter, FilterType::Sepia);
    }

    #[test]
    fn test_ids_round_trip() {
        for filter in FilterType::ALL {
            assert_eq!(FilterType::from_id(filter.id()), filter);
        }
    }

    #[test]
    fn test_only_normal_uses_identity_shader() {
        let catalog = FilterCatalog::default();
        let identity: Vec<_> = FilterType::ALL
            .into_iter()
            .filter(|f| catalog.descriptor(*f).fragment == IDENTITY_SHADER)
            .collect();
        assert_eq!(identity, vec![FilterType::Normal]);
    }

    #[test]
    fn test_beauty_levels() {
        assert_eq!(beauty_level(3), [0.6, 0.8, 0.25, 0.25]);
        assert_eq!(beauty_level(0), beauty_level(1));
        let catalog = FilterCatalog::new(5);
        assert_eq!(
            catalog.descriptor(FilterType::Beauty).params,
            FilterParams::Level([0.33, 0.63, 0.4, 0.35])
        );
    }

    #[test]
    fn test_kernel_uniform_packing() {
        let desc = FilterCatalog::default().descriptor(FilterType::Emboss);
        let u = desc.uniforms(IDENTITY, IDENTITY, [1.0 / 640.0, 1.0 / 480.0]);
        assert_eq!(u.kernel0, [2.0, 0.0, 0.0, 0.0]);
        assert_eq!(u.kernel1, [-1.0, 0.0, 0.0, 0.0]);
        assert_eq!(u.kernel2, [-1.0, 0.5, 0.0, 0.0]);
        assert_eq!(u.texel[0], 1.0 / 640.0);
    }

    #[test]
    fn test_serde_uses_ids() {
        #[derive(Serialize, Deserialize)]
        struct Wrap {
            filter: FilterType,
        }
        let text = toml::to_string(&Wrap {
            filter: FilterType::EdgeDetect,
        })
        .unwrap();
        assert!(text.contains("edge_detect"));
    }

    #[test]
    fn test_all_programs_validate() {
        let catalog = FilterCatalog::default();
        for filter in FilterType::ALL {
            let desc = catalog.descriptor(filter);
            let source = format!("{}\n{}", desc.vertex, desc.fragment);
            let module = naga::front::wgsl::parse_str(&source)
                .unwrap_or_else(|e| panic!("{} failed to parse: {}", desc.label, e));
            naga::valid::Validator::new(
                naga::valid::ValidationFlags::all(),
                naga::valid::Capabilities::all(),
            )
            .validate(&module)
            .unwrap_or_else(|e| panic!("{} failed to validate: {:?}", desc.label, e));
        }
    }
}
