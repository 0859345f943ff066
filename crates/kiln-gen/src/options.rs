//! Option resolution: default layering, strict validation and variant selection
//!
//! User-supplied options arrive as a partial [`GenerationOptions`] with raw
//! strings for the enum-like fields. [`resolve`] layers the model's defaults
//! underneath them (shallow, per-field; the user always wins) and validates
//! the result into a typed [`GenerationRequest`].

use crate::image_ref::ImageRef;
use crate::model::{ImageProvider, MeshFormat, MeshModel, Variant, View};
use kiln_core::{KilnError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Partial, user-facing generation options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, alias = "backendModel", skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_generate_references: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_views: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_references: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefer_fast: Option<bool>,
}

impl GenerationOptions {
    /// Shallow merge: every field set on `self` wins, unset fields come from `defaults`
    pub fn merged_with(&self, defaults: &GenerationOptions) -> GenerationOptions {
        GenerationOptions {
            prompt: self.prompt.clone().or_else(|| defaults.prompt.clone()),
            input_images: self
                .input_images
                .clone()
                .or_else(|| defaults.input_images.clone()),
            output_path: self
                .output_path
                .clone()
                .or_else(|| defaults.output_path.clone()),
            model: self.model.clone().or_else(|| defaults.model.clone()),
            variant: self.variant.clone().or_else(|| defaults.variant.clone()),
            format: self.format.clone().or_else(|| defaults.format.clone()),
            auto_generate_references: self
                .auto_generate_references
                .or(defaults.auto_generate_references),
            reference_views: self
                .reference_views
                .clone()
                .or_else(|| defaults.reference_views.clone()),
            cleanup_references: self.cleanup_references.or(defaults.cleanup_references),
            reference_provider: self
                .reference_provider
                .clone()
                .or_else(|| defaults.reference_provider.clone()),
            prefer_fast: self.prefer_fast.or(defaults.prefer_fast),
        }
    }
}

/// Process-wide fallbacks for fields no model default covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveDefaults {
    pub model: MeshModel,
    pub reference_provider: ImageProvider,
}

impl Default for ResolveDefaults {
    fn default() -> Self {
        Self {
            model: MeshModel::Trellis,
            reference_provider: ImageProvider::OpenAi,
        }
    }
}

/// Per-model default option layer.
///
/// The variant is deliberately left unset: when the caller does not pick one,
/// it is chosen by [`select_variant`] once the effective image count is known.
pub fn model_defaults(model: MeshModel, reference_provider: ImageProvider) -> GenerationOptions {
    GenerationOptions {
        prompt: None,
        input_images: Some(Vec::new()),
        output_path: None,
        model: Some(model.as_str().to_string()),
        variant: None,
        format: Some(MeshFormat::default().as_str().to_string()),
        auto_generate_references: Some(true),
        reference_views: Some(
            View::DEFAULT_REFERENCE_VIEWS
                .iter()
                .map(|v| v.as_str().to_string())
                .collect(),
        ),
        cleanup_references: Some(true),
        reference_provider: Some(reference_provider.as_str().to_string()),
        prefer_fast: Some(false),
    }
}

/// A fully-resolved, validated generation request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt: Option<String>,
    pub input_images: Vec<ImageRef>,
    pub output_path: PathBuf,
    pub model: MeshModel,
    pub variant: Option<Variant>,
    pub format: MeshFormat,
    pub auto_generate_references: bool,
    pub reference_views: Vec<View>,
    pub cleanup_references: bool,
    pub reference_provider: ImageProvider,
    pub prefer_fast: bool,
}

impl GenerationRequest {
    /// Variant used to plan reference views: the explicit one, else the model default
    pub fn planning_variant(&self) -> Variant {
        self.variant.unwrap_or_else(|| self.model.default_variant())
    }

    /// Views to synthesize when references are auto-generated.
    ///
    /// Single variants only need the front view. Endpoints that take one
    /// image per named view get exactly those views; other multi variants
    /// use `reference_views`.
    pub fn planned_reference_views(&self) -> Vec<View> {
        let variant = self.planning_variant();
        if !variant.is_multi() {
            return vec![View::Front];
        }
        crate::dispatch::route(self.model, variant)
            .ok()
            .and_then(|route| route.input.required_views())
            .unwrap_or_else(|| self.reference_views.clone())
    }

    /// True when the pipeline should synthesize references before dispatch
    pub fn wants_references(&self) -> bool {
        self.input_images.is_empty() && self.auto_generate_references && self.prompt.is_some()
    }
}

/// Layer defaults under `options` and validate strictly.
pub fn resolve(options: &GenerationOptions, defaults: &ResolveDefaults) -> Result<GenerationRequest> {
    let output_path = options
        .output_path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| KilnError::ValidationError("output path required".to_string()))?;

    let model: MeshModel = match options.model.as_deref() {
        Some(raw) => raw.parse()?,
        None => defaults.model,
    };

    let merged = options.merged_with(&model_defaults(model, defaults.reference_provider));

    let variant = match merged.variant.as_deref() {
        Some(raw) => {
            let variant: Variant = raw.parse()?;
            check_variant(model, variant)?;
            Some(variant)
        }
        None => None,
    };

    let format: MeshFormat = merged.format.as_deref().unwrap_or("glb").parse()?;
    if !model.supports_format(format) {
        let supported: Vec<&str> = model.spec().formats.iter().map(|f| f.as_str()).collect();
        return Err(KilnError::ConfigurationError(format!(
            "format '{}' is not supported by model '{}' (supported: {})",
            format,
            model,
            supported.join(", ")
        )));
    }

    let mut reference_views = Vec::new();
    for raw in merged.reference_views.as_deref().unwrap_or(&[]) {
        let view: View = raw.parse()?;
        if !reference_views.contains(&view) {
            reference_views.push(view);
        }
    }
    if reference_views.is_empty() {
        return Err(KilnError::ValidationError(
            "at least one reference view required".to_string(),
        ));
    }

    let reference_provider: ImageProvider = match merged.reference_provider.as_deref() {
        Some(raw) => raw.parse()?,
        None => defaults.reference_provider,
    };

    let mut input_images = Vec::new();
    for raw in merged.input_images.as_deref().unwrap_or(&[]) {
        if raw.trim().is_empty() {
            return Err(KilnError::ValidationError(
                "empty input image reference".to_string(),
            ));
        }
        input_images.push(ImageRef::parse(raw));
    }

    let prompt = merged
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    if input_images.is_empty() && prompt.is_none() {
        return Err(KilnError::ValidationError(
            "need image or prompt".to_string(),
        ));
    }

    Ok(GenerationRequest {
        prompt,
        input_images,
        output_path: PathBuf::from(output_path),
        model,
        variant,
        format,
        auto_generate_references: merged.auto_generate_references.unwrap_or(true),
        reference_views,
        cleanup_references: merged.cleanup_references.unwrap_or(true),
        reference_provider,
        prefer_fast: merged.prefer_fast.unwrap_or(false),
    })
}

/// Strict compatibility check against the model table
pub fn check_variant(model: MeshModel, variant: Variant) -> Result<()> {
    if model.supports_variant(variant) {
        return Ok(());
    }
    let supported: Vec<&str> = model.spec().variants.iter().map(|v| v.as_str()).collect();
    Err(KilnError::ConfigurationError(format!(
        "incompatible variant '{}' for model '{}' (supported: {})",
        variant,
        model,
        supported.join(", ")
    )))
}

/// Pick a variant when the caller did not specify one.
///
/// Single-variant models always get their only variant. Otherwise the multi
/// form is chosen for more than one input image, the single form otherwise,
/// and the fast form replaces it when `prefer_fast` is set and supported.
pub fn select_variant(model: MeshModel, image_count: usize, prefer_fast: bool) -> Variant {
    let spec = model.spec();
    if spec.variants.len() == 1 {
        return spec.variants[0];
    }

    let base = if image_count > 1 {
        Variant::Multi
    } else {
        Variant::Single
    };
    let base = if model.supports_variant(base) {
        base
    } else {
        spec.default_variant
    };

    if prefer_fast && model.supports_variant(base.fast_form()) {
        base.fast_form()
    } else {
        base
    }
}

/// Lenient variant choice: keeps a compatible request, otherwise warns and
/// falls back to [`select_variant`] instead of failing.
pub fn best_variant(
    model: MeshModel,
    requested: Option<Variant>,
    image_count: usize,
    prefer_fast: bool,
) -> Variant {
    match requested {
        Some(variant) if model.supports_variant(variant) => variant,
        Some(variant) => {
            let fallback = select_variant(model, image_count, prefer_fast);
            tracing::warn!(
                model = %model,
                requested = %variant,
                fallback = %fallback,
                "variant not supported by model, substituting"
            );
            fallback
        }
        None => select_variant(model, image_count, prefer_fast),
    }
}
