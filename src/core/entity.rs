//! Entity type and endpoint descriptors.
//!
//! Defines the supported entity types and the provider endpoint each one is
//! fetched from. Dispatch is table-driven: adding an entity type means adding
//! a variant and its row here, not a new branch in the orchestrator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RookeryError};

// =============================================================================
// Entity Type
// =============================================================================

/// Supported entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Post,
    Reply,
    Like,
    Bookmark,
    FollowEdge,
    List,
    ListMember,
    Message,
    Trend,
    Profile,
}

impl EntityType {
    /// All entity types in display order.
    pub const ALL: &'static [Self] = &[
        Self::Post,
        Self::Reply,
        Self::Like,
        Self::Bookmark,
        Self::FollowEdge,
        Self::List,
        Self::ListMember,
        Self::Message,
        Self::Trend,
        Self::Profile,
    ];

    /// Canonical name, used as the cache table tag and in stats output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Reply => "reply",
            Self::Like => "like",
            Self::Bookmark => "bookmark",
            Self::FollowEdge => "follow_edge",
            Self::List => "list",
            Self::ListMember => "list_member",
            Self::Message => "message",
            Self::Trend => "trend",
            Self::Profile => "profile",
        }
    }

    /// Parse from a canonical name.
    pub fn from_name(name: &str) -> Result<Self> {
        let lower = name.to_lowercase();
        Self::ALL
            .iter()
            .find(|t| t.as_str() == lower)
            .copied()
            .ok_or_else(|| RookeryError::UnknownEntityType(name.to_string()))
    }

    /// Default time-to-live for cached records of this type.
    ///
    /// Volatile data (likes, bookmarks, messages) turns over quickly and gets
    /// a short TTL; stable data (posts, profiles, lists) keeps a day; trends
    /// expire with the provider's 15-minute window.
    #[must_use]
    pub const fn default_ttl(self) -> Duration {
        match self {
            Self::Post | Self::Reply | Self::Profile | Self::FollowEdge => {
                Duration::from_secs(24 * 60 * 60)
            }
            Self::List | Self::ListMember => Duration::from_secs(24 * 60 * 60),
            Self::Like | Self::Bookmark | Self::Message => Duration::from_secs(60 * 60),
            Self::Trend => Duration::from_secs(15 * 60),
        }
    }

    /// The provider endpoint this entity type is fetched from.
    #[must_use]
    pub const fn endpoint(self) -> Endpoint {
        match self {
            Self::Post => Endpoint::UserTweets,
            Self::Reply => Endpoint::UserTweets,
            Self::Like => Endpoint::LikedTweets,
            Self::Bookmark => Endpoint::Bookmarks,
            Self::FollowEdge => Endpoint::Followers,
            Self::List => Endpoint::OwnedLists,
            Self::ListMember => Endpoint::ListMembers,
            Self::Message => Endpoint::DmEvents,
            Self::Trend => Endpoint::Trends,
            Self::Profile => Endpoint::UserLookup,
        }
    }

    /// Fields treated as immutable identity for reconciliation.
    ///
    /// Two non-null disagreeing values for one of these is a hard conflict,
    /// never silently resolved.
    #[must_use]
    pub const fn immutable_fields(self) -> &'static [&'static str] {
        match self {
            Self::Post | Self::Reply | Self::Like | Self::Bookmark => {
                &["id", "author_id", "created_at"]
            }
            Self::Profile | Self::FollowEdge | Self::ListMember => &["id", "created_at"],
            Self::List => &["id", "owner_id", "created_at"],
            Self::Message => &["id", "sender_id", "created_at"],
            Self::Trend => &[],
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// Provider API endpoints, each carrying its own request quota.
///
/// Limits and windows mirror the provider's published v2 budgets. Quota is
/// tracked per endpoint, never shared across endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    UserTweets,
    LikedTweets,
    Bookmarks,
    Followers,
    OwnedLists,
    ListMembers,
    DmEvents,
    Trends,
    UserLookup,
}

impl Endpoint {
    /// All endpoints.
    pub const ALL: &'static [Self] = &[
        Self::UserTweets,
        Self::LikedTweets,
        Self::Bookmarks,
        Self::Followers,
        Self::OwnedLists,
        Self::ListMembers,
        Self::DmEvents,
        Self::Trends,
        Self::UserLookup,
    ];

    /// Stable identifier, used as the quota-table key and in error output.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::UserTweets => "user_tweets",
            Self::LikedTweets => "liked_tweets",
            Self::Bookmarks => "bookmarks",
            Self::Followers => "followers",
            Self::OwnedLists => "owned_lists",
            Self::ListMembers => "list_members",
            Self::DmEvents => "dm_events",
            Self::Trends => "trends",
            Self::UserLookup => "user_lookup",
        }
    }

    /// Request path template, `{selector}` replaced per request.
    #[must_use]
    pub const fn path_template(self) -> &'static str {
        match self {
            Self::UserTweets => "/2/users/{selector}/tweets",
            Self::LikedTweets => "/2/users/{selector}/liked_tweets",
            Self::Bookmarks => "/2/users/{selector}/bookmarks",
            Self::Followers => "/2/users/{selector}/followers",
            Self::OwnedLists => "/2/users/{selector}/owned_lists",
            Self::ListMembers => "/2/lists/{selector}/members",
            Self::DmEvents => "/2/dm_conversations/with/{selector}/dm_events",
            Self::Trends => "/2/trends/by/woeid/{selector}",
            Self::UserLookup => "/2/users/{selector}",
        }
    }

    /// Requests allowed per quota window.
    #[must_use]
    pub const fn request_limit(self) -> u32 {
        match self {
            Self::UserTweets => 1500,
            Self::DmEvents => 300,
            Self::UserLookup => 300,
            Self::Trends => 75,
            Self::LikedTweets
            | Self::Bookmarks
            | Self::Followers
            | Self::OwnedLists
            | Self::ListMembers => 180,
        }
    }

    /// Quota window duration. The provider uses a uniform 15-minute window.
    #[must_use]
    pub const fn window(self) -> Duration {
        Duration::from_secs(15 * 60)
    }

    /// Maximum results per page the provider accepts for this endpoint.
    #[must_use]
    pub const fn max_page_size(self) -> u32 {
        match self {
            Self::Followers => 1000,
            Self::Trends => 50,
            _ => 100,
        }
    }

    /// Build a concrete request path for a selector.
    #[must_use]
    pub fn path_for(self, selector: &str) -> String {
        self.path_template().replace("{selector}", selector)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}
