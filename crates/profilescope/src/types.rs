//! Core data types: subjects, categories, extracted records.

use crate::error::ScopeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Locale used when the caller does not supply one.
pub const DEFAULT_LOCALE: &str = "en-US";

/// The profile being queried, identified by its username.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    /// Validate and normalize a username. A single leading `@` is dropped.
    pub fn parse(raw: &str) -> Result<Self, ScopeError> {
        let trimmed = raw.trim();
        let name = trimmed.strip_prefix('@').unwrap_or(trimmed);
        let valid = !name.is_empty()
            && name.len() <= 64
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(ScopeError::InvalidSubject(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a scraped user handle refers to this subject.
    pub fn matches_user(&self, user: &str) -> bool {
        let user = user.trim();
        let user = user.strip_prefix('@').unwrap_or(user);
        user.eq_ignore_ascii_case(&self.0)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Subject {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Subject::parse(s)
    }
}

/// One of the content groupings a subject's page may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Profile,
    Spotlight,
    Stories,
    Lenses,
    Tagged,
    Related,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Profile,
        Category::Spotlight,
        Category::Stories,
        Category::Lenses,
        Category::Tagged,
        Category::Related,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Profile => "profile",
            Category::Spotlight => "spotlight",
            Category::Stories => "stories",
            Category::Lenses => "lenses",
            Category::Tagged => "tagged",
            Category::Related => "related",
        }
    }

    /// Dense index, used by the category registry.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Value of the `tab` query parameter on the upstream page, if any.
    pub fn tab_param(self) -> Option<&'static str> {
        match self {
            Category::Profile => None,
            Category::Spotlight => Some("Spotlight"),
            Category::Stories => Some("Stories"),
            Category::Lenses => Some("Lenses"),
            Category::Tagged => Some("Tagged"),
            Category::Related => Some("Related"),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "profile" => Ok(Category::Profile),
            "spotlight" => Ok(Category::Spotlight),
            "stories" | "story" => Ok(Category::Stories),
            "lenses" | "lens" => Ok(Category::Lenses),
            "tagged" => Ok(Category::Tagged),
            "related" => Ok(Category::Related),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

/// Cache and request key: one (subject, category, locale) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TabKey {
    pub subject: Subject,
    pub category: Category,
    pub locale: String,
}

impl TabKey {
    pub fn new(subject: Subject, category: Category, locale: impl Into<String>) -> Self {
        Self {
            subject,
            category,
            locale: locale.into(),
        }
    }
}

impl fmt::Display for TabKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.subject, self.category, self.locale)
    }
}

/// Profile metadata. Replaced wholesale on refetch, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    pub username: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follower_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Engagement counters shown on spotlight and tagged tiles, kept as displayed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shares: Option<String>,
}

impl Engagement {
    pub fn is_empty(&self) -> bool {
        self.views.is_none() && self.comments.is_none() && self.shares.is_none()
    }
}

/// Category-specific part of a tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum TileKind {
    Profile,
    Spotlight(Engagement),
    Story {
        #[serde(rename = "isStory")]
        is_story: bool,
    },
    Lens,
    Tagged(Engagement),
    Related {
        #[serde(rename = "isProfile")]
        is_profile: bool,
    },
}

impl TileKind {
    /// The empty variant for a category.
    pub fn for_category(category: Category) -> Self {
        match category {
            Category::Profile => TileKind::Profile,
            Category::Spotlight => TileKind::Spotlight(Engagement::default()),
            Category::Stories => TileKind::Story { is_story: true },
            Category::Lenses => TileKind::Lens,
            Category::Tagged => TileKind::Tagged(Engagement::default()),
            Category::Related => TileKind::Related { is_profile: true },
        }
    }

    pub fn category(&self) -> Category {
        match self {
            TileKind::Profile => Category::Profile,
            TileKind::Spotlight(_) => Category::Spotlight,
            TileKind::Story { .. } => Category::Stories,
            TileKind::Lens => Category::Lenses,
            TileKind::Tagged(_) => Category::Tagged,
            TileKind::Related { .. } => Category::Related,
        }
    }

    pub fn engagement(&self) -> Option<&Engagement> {
        match self {
            TileKind::Spotlight(e) | TileKind::Tagged(e) => Some(e),
            _ => None,
        }
    }

    pub fn engagement_mut(&mut self) -> Option<&mut Engagement> {
        match self {
            TileKind::Spotlight(e) | TileKind::Tagged(e) => Some(e),
            _ => None,
        }
    }
}

/// One structured content record derived from a node or an embedded payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentTile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_url: Option<String>,
    #[serde(flatten)]
    pub kind: TileKind,
}

impl ContentTile {
    pub fn empty(category: Category) -> Self {
        Self {
            thumbnail_url: None,
            user: None,
            description: None,
            canonical_url: None,
            kind: TileKind::for_category(category),
        }
    }

    pub fn category(&self) -> Category {
        self.kind.category()
    }

    pub fn is_story(&self) -> bool {
        matches!(self.kind, TileKind::Story { is_story: true })
    }

    pub fn is_profile(&self) -> bool {
        matches!(self.kind, TileKind::Related { is_profile: true })
    }

    /// Required-field rule: profile tiles need a user, story tiles need a user
    /// and a description, everything else needs one of the two. A thumbnail
    /// alone never qualifies.
    pub fn satisfies_invariants(&self) -> bool {
        let user = non_blank(&self.user);
        let description = non_blank(&self.description);
        match self.kind {
            TileKind::Profile => user,
            TileKind::Story { .. } => user && description,
            _ => user || description,
        }
    }

    /// Whether the tile names anyone or says anything. A thumbnail alone
    /// does not count.
    pub fn has_text(&self) -> bool {
        non_blank(&self.user) || non_blank(&self.description)
    }
}

fn non_blank(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// Extraction output for one (subject, category).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TabContent {
    Profile {
        record: Option<ProfileRecord>,
        tiles: Vec<ContentTile>,
    },
    Tiles {
        category: Category,
        tiles: Vec<ContentTile>,
    },
}

impl TabContent {
    pub fn empty(category: Category) -> Self {
        match category {
            Category::Profile => TabContent::Profile {
                record: None,
                tiles: Vec::new(),
            },
            category => TabContent::Tiles {
                category,
                tiles: Vec::new(),
            },
        }
    }

    pub fn tiles(&self) -> &[ContentTile] {
        match self {
            TabContent::Profile { tiles, .. } | TabContent::Tiles { tiles, .. } => tiles,
        }
    }

    pub fn record(&self) -> Option<&ProfileRecord> {
        match self {
            TabContent::Profile { record, .. } => record.as_ref(),
            TabContent::Tiles { .. } => None,
        }
    }

    /// No tiles and no profile record.
    pub fn is_empty(&self) -> bool {
        self.tiles().is_empty() && self.record().is_none()
    }
}

/// A playable media URL and the strategy that found it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoResolution {
    pub url: String,
    /// 1-based position of the winning strategy in the resolver chain.
    pub strategy_index: u8,
    pub confidence: f32,
}
