//! Command handlers. Each returns the JSON document printed on stdout.

use anyhow::Context;
use profilescope::{Category, ProfileScope, Subject};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct TabsReport {
    subject: String,
    categories: Vec<Category>,
}

/// Profile record and highlight tiles.
pub async fn profile(scope: &Arc<ProfileScope>, subject: &Subject) -> anyhow::Result<Value> {
    let content = scope
        .fetch_tab(subject, Category::Profile)
        .await
        .with_context(|| format!("loading profile of {subject}"))?;
    Ok(serde_json::to_value(&content)?)
}

/// Tiles of one category. Categories validation has not confirmed are an
/// error rather than an empty list.
pub async fn tab(scope: &Arc<ProfileScope>, subject: &Subject, category: Category) -> anyhow::Result<Value> {
    if category == Category::Profile {
        return profile(scope, subject).await;
    }
    let content = scope
        .fetch_tab(subject, category)
        .await
        .with_context(|| format!("loading {category} of {subject}"))?;
    Ok(serde_json::to_value(content.tiles())?)
}

/// Categories known to exist once validation finishes or `deadline` passes.
pub async fn tabs(scope: &Arc<ProfileScope>, subject: &Subject, deadline: Duration) -> anyhow::Result<Value> {
    let found = scope.available_categories(subject, deadline).await;
    let report = TabsReport {
        subject: subject.to_string(),
        categories: found.into_iter().collect(),
    };
    Ok(serde_json::to_value(report)?)
}

/// Playable URL for a content item, or `null`.
pub async fn resolve(scope: &ProfileScope, canonical_url: &str) -> anyhow::Result<Value> {
    let resolution = scope
        .resolve_video(canonical_url)
        .await
        .with_context(|| format!("resolving {canonical_url}"))?;
    if resolution.is_none() {
        tracing::info!("no playable URL for {canonical_url}; use the tile thumbnail");
    }
    Ok(serde_json::to_value(resolution)?)
}
