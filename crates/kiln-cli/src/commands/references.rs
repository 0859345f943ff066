//! `kiln references` - synthesize reference images without building a mesh

use super::{split_list, Gateway};
use anyhow::{bail, Context, Result};
use kiln_gen::{generate_references, ImageProvider, View};
use std::path::Path;

pub async fn run(
    gateway: &Gateway,
    prompt: &str,
    output: &str,
    views: &str,
    provider: Option<&str>,
) -> Result<()> {
    let provider = match provider {
        Some(name) => name.parse::<ImageProvider>()?,
        None => gateway.runner.defaults().reference_provider,
    };
    let views = parse_views(views)?;
    if views.is_empty() {
        bail!("No reference views given");
    }

    println!(
        "Generating {} reference view(s) with {}...",
        views.len(),
        provider
    );
    println!("  Prompt: {}", prompt);

    let images = gateway.runner.images();
    let refs = generate_references(images.as_ref(), provider, prompt, Path::new(output), &views)
        .await
        .context("Reference generation failed")?;

    if refs.is_empty() {
        bail!("No reference images were generated");
    }
    for reference in &refs {
        println!("  {}: {}", reference.view, reference.path.display());
    }
    if refs.len() < views.len() {
        println!("  Only {} of {} views succeeded", refs.len(), views.len());
    }
    Ok(())
}

pub fn parse_views(raw: &str) -> Result<Vec<View>> {
    let mut views = Vec::new();
    for name in split_list(raw) {
        let view = name.parse::<View>()?;
        if !views.contains(&view) {
            views.push(view);
        }
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_views_dedupes() {
        let views = parse_views("back, front,back").unwrap();
        assert_eq!(views, vec![View::Back, View::Front]);
    }

    #[test]
    fn test_parse_views_rejects_unknown() {
        assert!(parse_views("front,diagonal").is_err());
    }
}
