//! Per-category rule sets, built once and indexed by [`Category`].

use super::fields::{
    background_image_url, clean_handle, first_srcset_url, handle_in_text, residual_text,
    strip_title_suffix, user_from_href,
};
use super::payload::PayloadShape;
use crate::cascade::{Accessor, ExtractionRule, NodeRule};
use crate::types::Category;
use scraper::ElementRef;

/// Everything needed to extract one category's tiles.
pub struct CategorySpec {
    pub category: Category,
    /// Cascade of selectors locating tile roots; the first that matches wins.
    pub tile_nodes: Vec<NodeRule>,
    pub user: Vec<ExtractionRule>,
    pub description: Vec<ExtractionRule>,
    pub thumbnail: Vec<ExtractionRule>,
    pub canonical: Vec<ExtractionRule>,
    /// Keys in embedded payloads whose arrays hold this category's items.
    pub collection_keys: &'static [&'static str],
    /// Payload shapes this category accepts; everything else is ignored.
    pub accepted_shapes: &'static [PayloadShape],
    /// Path segment used to build a canonical URL from a payload id.
    pub canonical_prefix: Option<&'static str>,
    /// Tiles without an author belong to the page owner.
    pub owner_is_subject: bool,
    pub reads_engagement: bool,
    /// Drop tiles authored by the subject.
    pub excludes_subject: bool,
}

/// Cascades for the profile record fields.
pub struct ProfileRules {
    pub display_name: Vec<ExtractionRule>,
    pub bio: Vec<ExtractionRule>,
    pub avatar: Vec<ExtractionRule>,
    pub followers: Vec<ExtractionRule>,
    pub category: Vec<ExtractionRule>,
}

pub struct CategoryRegistry {
    specs: [CategorySpec; 6],
    profile: ProfileRules,
}

impl CategoryRegistry {
    pub fn new() -> Self {
        Self {
            specs: Category::ALL.map(build_spec),
            profile: build_profile_rules(),
        }
    }

    pub fn spec(&self, category: Category) -> &CategorySpec {
        &self.specs[category.index()]
    }

    pub fn profile_rules(&self) -> &ProfileRules {
        &self.profile
    }
}

impl Default for CategoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn build_spec(category: Category) -> CategorySpec {
    match category {
        Category::Profile => CategorySpec {
            category,
            tile_nodes: vec![
                NodeRule::new("highlight-testid", r#"[data-testid*="highlight"] a[href]"#),
                NodeRule::new("highlight-href", r#"a[href*="/highlight/"]"#),
                NodeRule::new("highlight-class", r#"[class*="Highlight"] a[href]"#),
            ],
            user: owner_user_rules(),
            description: description_rules(),
            thumbnail: thumbnail_rules(),
            canonical: canonical_rules(),
            collection_keys: &["curatedHighlights", "highlights", "savedStories"],
            accepted_shapes: &[PayloadShape::Story, PayloadShape::Snap],
            canonical_prefix: Some("highlight"),
            owner_is_subject: true,
            reads_engagement: false,
            excludes_subject: false,
        },
        Category::Spotlight => CategorySpec {
            category,
            tile_nodes: vec![
                NodeRule::new("spotlight-testid", r#"[data-testid="spotlight-tile"]"#),
                NodeRule::new("spotlight-href", r#"a[href*="/spotlight/"]"#),
                NodeRule::new("spotlight-class", r#"[class*="SpotlightTile"] a[href]"#),
            ],
            user: owner_user_rules(),
            description: description_rules(),
            thumbnail: thumbnail_rules(),
            canonical: canonical_rules(),
            collection_keys: &[
                "spotlightHighlights",
                "spotlightStoryMetadata",
                "spotlights",
                "spotlightSnaps",
            ],
            accepted_shapes: &[PayloadShape::Snap],
            canonical_prefix: Some("spotlight"),
            owner_is_subject: true,
            reads_engagement: true,
            excludes_subject: false,
        },
        Category::Stories => CategorySpec {
            category,
            tile_nodes: vec![
                NodeRule::new("story-testid", r#"[data-testid*="story-tile"]"#),
                NodeRule::new("story-href", r#"a[href*="/story/"]"#),
                NodeRule::new("story-class", r#"[class*="StoryTile"] a[href]"#),
            ],
            user: owner_user_rules(),
            description: description_rules(),
            thumbnail: thumbnail_rules(),
            canonical: canonical_rules(),
            collection_keys: &["story", "stories", "snapList", "storySnaps"],
            accepted_shapes: &[PayloadShape::Story, PayloadShape::Snap],
            canonical_prefix: Some("story"),
            owner_is_subject: true,
            reads_engagement: false,
            excludes_subject: false,
        },
        Category::Lenses => CategorySpec {
            category,
            tile_nodes: vec![
                NodeRule::new("lens-testid", r#"[data-testid*="lens"] a[href]"#),
                NodeRule::new("lens-href", r#"a[href*="/lens/"]"#),
                NodeRule::new("lens-class", r#"[class*="LensTile"] a[href]"#),
            ],
            user: mention_user_rules(),
            description: description_rules(),
            thumbnail: thumbnail_rules(),
            canonical: canonical_rules(),
            collection_keys: &["lenses", "lensList", "creatorLenses"],
            accepted_shapes: &[PayloadShape::Lens],
            canonical_prefix: Some("lens"),
            owner_is_subject: false,
            reads_engagement: false,
            excludes_subject: false,
        },
        Category::Tagged => CategorySpec {
            category,
            tile_nodes: vec![
                NodeRule::new("tagged-testid", r#"[data-testid*="tagged"] a[href]"#),
                NodeRule::new("tagged-class", r#"[class*="Tagged"] a[href]"#),
                NodeRule::new("tagged-spotlight-href", r#"a[href*="/spotlight/"]"#),
            ],
            user: mention_user_rules(),
            description: description_rules(),
            thumbnail: thumbnail_rules(),
            canonical: canonical_rules(),
            collection_keys: &["taggedSnaps", "taggedSpotlights", "mentions"],
            accepted_shapes: &[PayloadShape::Snap],
            canonical_prefix: Some("spotlight"),
            owner_is_subject: false,
            reads_engagement: true,
            excludes_subject: true,
        },
        Category::Related => CategorySpec {
            category,
            tile_nodes: vec![
                NodeRule::new("related-testid", r#"[data-testid*="related"] a[href*="/add/"]"#),
                NodeRule::new("related-class", r#"[class*="RelatedAccount"] a[href]"#),
                NodeRule::new("related-add-href", r#"a[href*="/add/"]"#),
            ],
            user: related_user_rules(),
            description: related_name_rules(),
            thumbnail: thumbnail_rules(),
            canonical: canonical_rules(),
            collection_keys: &["relatedAccountsInfo", "relatedProfiles", "relatedAccounts"],
            accepted_shapes: &[PayloadShape::PublicProfile],
            canonical_prefix: Some("add"),
            owner_is_subject: false,
            reads_engagement: false,
            excludes_subject: true,
        },
    }
}

fn scope_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ")
}

fn user_rules_head() -> Vec<ExtractionRule> {
    vec![
        ExtractionRule::text("username-testid", r#"[data-testid*="username"]"#).map(clean_handle),
        ExtractionRule::text("username-class", r#"[class*="username"], [class*="Username"]"#)
            .map(clean_handle),
    ]
}

/// Author lookup for tiles on the subject's own tabs.
fn owner_user_rules() -> Vec<ExtractionRule> {
    let mut rules = user_rules_head();
    rules.push(ExtractionRule::attr("creator-link", r#"a[href*="/add/"]"#, "href").map(user_from_href));
    rules
}

/// Author lookup for tiles that mention or come from other accounts.
fn mention_user_rules() -> Vec<ExtractionRule> {
    let mut rules = user_rules_head();
    rules.push(ExtractionRule::custom("handle-in-text", |el| handle_in_text(&scope_text(el))));
    rules.push(ExtractionRule::attr("creator-link", r#"a[href*="/add/"]"#, "href").map(user_from_href));
    rules
}

fn related_user_rules() -> Vec<ExtractionRule> {
    let mut rules = vec![ExtractionRule::own("own-href", Accessor::Attr("href")).map(user_from_href)];
    rules.extend(user_rules_head());
    rules.push(ExtractionRule::custom("handle-in-text", |el| handle_in_text(&scope_text(el))));
    rules
}

fn description_rules() -> Vec<ExtractionRule> {
    vec![
        ExtractionRule::text(
            "description-testid",
            r#"[data-testid*="description"], [data-testid*="title"]"#,
        ),
        ExtractionRule::text(
            "description-class",
            r#"[class*="description"], [class*="Description"], [class*="title"], [class*="Title"]"#,
        ),
        ExtractionRule::attr("image-alt", "img[alt]", "alt"),
        ExtractionRule::own("aria-label", Accessor::Attr("aria-label")),
        ExtractionRule::custom("residual-text", |el| residual_text(&scope_text(el))),
    ]
}

fn related_name_rules() -> Vec<ExtractionRule> {
    vec![
        ExtractionRule::text(
            "display-name-testid",
            r#"[data-testid*="display-name"], [data-testid*="displayName"]"#,
        ),
        ExtractionRule::text("display-name-class", r#"[class*="displayName"], [class*="DisplayName"]"#),
        ExtractionRule::attr("image-alt", "img[alt]", "alt"),
        ExtractionRule::custom("residual-text", |el| residual_text(&scope_text(el))),
    ]
}

/// Rejects inline and script URLs so the cascade moves on to a real asset.
fn fetchable(raw: &str) -> Option<String> {
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("data:") || lower.starts_with("blob:") || lower.starts_with("javascript:") {
        None
    } else {
        Some(raw.to_string())
    }
}

fn srcset_url(raw: &str) -> Option<String> {
    first_srcset_url(raw).and_then(|u| fetchable(&u))
}

fn style_url(raw: &str) -> Option<String> {
    background_image_url(raw).and_then(|u| fetchable(&u))
}

fn thumbnail_rules() -> Vec<ExtractionRule> {
    vec![
        ExtractionRule::attr("img-src", "img[src]", "src").map(fetchable),
        ExtractionRule::attr("img-data-src", "img[data-src]", "data-src").map(fetchable),
        ExtractionRule::attr("srcset", "img[srcset], source[srcset]", "srcset").map(srcset_url),
        ExtractionRule::attr("video-poster", "video[poster]", "poster").map(fetchable),
        ExtractionRule::attr("background", r#"[style*="url("]"#, "style").map(style_url),
        ExtractionRule::own("own-background", Accessor::Attr("style")).map(style_url),
    ]
}

fn link_target(raw: &str) -> Option<String> {
    if raw.starts_with('#') {
        None
    } else {
        fetchable(raw)
    }
}

fn canonical_rules() -> Vec<ExtractionRule> {
    vec![
        ExtractionRule::own("own-href", Accessor::Attr("href")).map(link_target),
        ExtractionRule::attr("inner-link", "a[href]", "href").map(link_target),
        ExtractionRule::own("data-href", Accessor::Attr("data-href")).map(link_target),
    ]
}

fn build_profile_rules() -> ProfileRules {
    ProfileRules {
        display_name: vec![
            ExtractionRule::attr("og-title", r#"meta[property="og:title"]"#, "content")
                .map(strip_title_suffix),
            ExtractionRule::text("heading", "h1"),
            ExtractionRule::text("display-name-testid", r#"[data-testid="display-name"]"#),
        ],
        bio: vec![
            ExtractionRule::text("bio-testid", r#"[data-testid*="bio"]"#),
            ExtractionRule::text("bio-class", r#"[class*="bio"], [class*="Bio"]"#),
        ],
        avatar: vec![
            ExtractionRule::attr("og-image", r#"meta[property="og:image"]"#, "content").map(fetchable),
            ExtractionRule::attr("avatar-testid", r#"[data-testid*="avatar"] img"#, "src").map(fetchable),
            ExtractionRule::attr("avatar-class", r#"img[class*="avatar"], img[class*="Avatar"]"#, "src")
                .map(fetchable),
        ],
        followers: vec![
            ExtractionRule::text("subscriber-testid", r#"[data-testid*="subscriber"]"#),
            ExtractionRule::text("subscriber-class", r#"[class*="subscriber"], [class*="Subscriber"]"#),
            ExtractionRule::custom("audience-label", |el| {
                super::fields::audience_in_text(&scope_text(el))
            }),
        ],
        category: vec![
            ExtractionRule::text("category-testid", r#"[data-testid*="category"]"#),
            ExtractionRule::text("category-class", r#"[class*="creatorCategory"], [class*="CreatorCategory"]"#),
        ],
    }
}
