//! Model, variant, format and view vocabulary plus the static compatibility table

use kiln_core::{KilnError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 3D generation backend model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshModel {
    Trellis,
    Hunyuan3d,
    Tripo,
    Meshy,
}

/// The remote service hosting a mesh model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshProvider {
    Fal,
    Meshy,
}

/// Backend-specific generation sub-mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    Single,
    Multi,
    SingleFast,
    MultiFast,
}

/// Output mesh format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MeshFormat {
    #[default]
    Glb,
    Obj,
}

/// Camera view tag for a reference image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Front,
    Back,
    Left,
    Right,
    Top,
    Bottom,
}

/// Provider used to synthesize reference images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageProvider {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
    Flux,
}

/// One row of the compatibility table
#[derive(Debug)]
pub struct ModelSpec {
    pub model: MeshModel,
    pub provider: MeshProvider,
    pub variants: &'static [Variant],
    pub default_variant: Variant,
    pub formats: &'static [MeshFormat],
}

static MODEL_TABLE: [ModelSpec; 4] = [
    ModelSpec {
        model: MeshModel::Trellis,
        provider: MeshProvider::Fal,
        variants: &[Variant::Single, Variant::Multi],
        default_variant: Variant::Single,
        formats: &[MeshFormat::Glb],
    },
    ModelSpec {
        model: MeshModel::Hunyuan3d,
        provider: MeshProvider::Fal,
        variants: &[
            Variant::Single,
            Variant::Multi,
            Variant::SingleFast,
            Variant::MultiFast,
        ],
        default_variant: Variant::Single,
        formats: &[MeshFormat::Glb],
    },
    ModelSpec {
        model: MeshModel::Tripo,
        provider: MeshProvider::Fal,
        variants: &[Variant::Single],
        default_variant: Variant::Single,
        formats: &[MeshFormat::Glb],
    },
    ModelSpec {
        model: MeshModel::Meshy,
        provider: MeshProvider::Meshy,
        variants: &[Variant::Single, Variant::Multi],
        default_variant: Variant::Single,
        formats: &[MeshFormat::Glb, MeshFormat::Obj],
    },
];

impl MeshModel {
    pub const ALL: [MeshModel; 4] = [
        MeshModel::Trellis,
        MeshModel::Hunyuan3d,
        MeshModel::Tripo,
        MeshModel::Meshy,
    ];

    /// The compatibility-table row for this model
    pub fn spec(self) -> &'static ModelSpec {
        let index = match self {
            MeshModel::Trellis => 0,
            MeshModel::Hunyuan3d => 1,
            MeshModel::Tripo => 2,
            MeshModel::Meshy => 3,
        };
        &MODEL_TABLE[index]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MeshModel::Trellis => "trellis",
            MeshModel::Hunyuan3d => "hunyuan3d",
            MeshModel::Tripo => "tripo",
            MeshModel::Meshy => "meshy",
        }
    }

    pub fn provider(self) -> MeshProvider {
        self.spec().provider
    }

    pub fn default_variant(self) -> Variant {
        self.spec().default_variant
    }

    pub fn supports_variant(self, variant: Variant) -> bool {
        self.spec().variants.contains(&variant)
    }

    pub fn supports_format(self, format: MeshFormat) -> bool {
        self.spec().formats.contains(&format)
    }
}

impl MeshProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            MeshProvider::Fal => "fal",
            MeshProvider::Meshy => "meshy",
        }
    }
}

impl Variant {
    pub const ALL: [Variant; 4] = [
        Variant::Single,
        Variant::Multi,
        Variant::SingleFast,
        Variant::MultiFast,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Single => "single",
            Variant::Multi => "multi",
            Variant::SingleFast => "single-fast",
            Variant::MultiFast => "multi-fast",
        }
    }

    /// True for the multi-image forms
    pub fn is_multi(self) -> bool {
        matches!(self, Variant::Multi | Variant::MultiFast)
    }

    pub fn is_fast(self) -> bool {
        matches!(self, Variant::SingleFast | Variant::MultiFast)
    }

    /// The fast/turbo counterpart of this variant
    pub fn fast_form(self) -> Variant {
        match self {
            Variant::Single | Variant::SingleFast => Variant::SingleFast,
            Variant::Multi | Variant::MultiFast => Variant::MultiFast,
        }
    }
}

impl MeshFormat {
    pub const ALL: [MeshFormat; 2] = [MeshFormat::Glb, MeshFormat::Obj];

    pub fn as_str(self) -> &'static str {
        match self {
            MeshFormat::Glb => "glb",
            MeshFormat::Obj => "obj",
        }
    }
}

impl View {
    pub const ALL: [View; 6] = [
        View::Front,
        View::Back,
        View::Left,
        View::Right,
        View::Top,
        View::Bottom,
    ];

    /// Views used when a request does not name any
    pub const DEFAULT_REFERENCE_VIEWS: [View; 3] = [View::Front, View::Back, View::Top];

    pub fn as_str(self) -> &'static str {
        match self {
            View::Front => "front",
            View::Back => "back",
            View::Left => "left",
            View::Right => "right",
            View::Top => "top",
            View::Bottom => "bottom",
        }
    }
}

impl ImageProvider {
    pub const ALL: [ImageProvider; 3] =
        [ImageProvider::OpenAi, ImageProvider::Gemini, ImageProvider::Flux];

    pub fn as_str(self) -> &'static str {
        match self {
            ImageProvider::OpenAi => "openai",
            ImageProvider::Gemini => "gemini",
            ImageProvider::Flux => "flux",
        }
    }
}

fn parse_named<T: Copy>(kind: &str, raw: &str, all: &[T], name: fn(T) -> &'static str) -> Result<T> {
    let wanted = raw.trim().to_ascii_lowercase();
    all.iter()
        .copied()
        .find(|candidate| name(*candidate) == wanted)
        .ok_or_else(|| {
            let expected: Vec<&str> = all.iter().map(|c| name(*c)).collect();
            KilnError::ValidationError(format!(
                "unknown {} '{}' (expected one of: {})",
                kind,
                raw,
                expected.join(", ")
            ))
        })
}

macro_rules! named_enum_impls {
    ($ty:ty, $kind:literal) => {
        impl FromStr for $ty {
            type Err = KilnError;

            fn from_str(s: &str) -> Result<Self> {
                parse_named($kind, s, &<$ty>::ALL, <$ty>::as_str)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

named_enum_impls!(MeshModel, "model");
named_enum_impls!(Variant, "variant");
named_enum_impls!(MeshFormat, "format");
named_enum_impls!(View, "view");
named_enum_impls!(ImageProvider, "image provider");

impl fmt::Display for MeshProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_variant_is_permitted() {
        for model in MeshModel::ALL {
            assert!(
                model.supports_variant(model.default_variant()),
                "{} default variant not permitted",
                model
            );
            assert!(model.supports_format(MeshFormat::Glb));
        }
    }

    #[test]
    fn test_table_rows_match_models() {
        for model in MeshModel::ALL {
            assert_eq!(model.spec().model, model);
        }
    }

    #[test]
    fn test_parse_roundtrip_names() {
        for model in MeshModel::ALL {
            assert_eq!(model.as_str().parse::<MeshModel>().unwrap(), model);
        }
        for variant in Variant::ALL {
            assert_eq!(variant.as_str().parse::<Variant>().unwrap(), variant);
        }
        assert_eq!("OpenAI".parse::<ImageProvider>().unwrap(), ImageProvider::OpenAi);
    }

    #[test]
    fn test_unknown_names_are_validation_errors() {
        let err = "stable-fast-3d".parse::<MeshModel>().unwrap_err();
        assert!(matches!(err, KilnError::ValidationError(_)));
        assert!(err.to_string().contains("unknown model"));

        let err = "turbo".parse::<Variant>().unwrap_err();
        assert!(err.to_string().contains("unknown variant"));
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Variant::MultiFast).unwrap(), "\"multi-fast\"");
        assert_eq!(serde_json::to_string(&ImageProvider::OpenAi).unwrap(), "\"openai\"");
        assert_eq!(serde_json::to_string(&MeshModel::Hunyuan3d).unwrap(), "\"hunyuan3d\"");
    }

    #[test]
    fn test_fast_form() {
        assert_eq!(Variant::Single.fast_form(), Variant::SingleFast);
        assert_eq!(Variant::Multi.fast_form(), Variant::MultiFast);
        assert!(Variant::MultiFast.is_multi());
        assert!(!Variant::SingleFast.is_multi());
    }
}
