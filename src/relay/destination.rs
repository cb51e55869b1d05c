//! Destination chat resolution.
//!
//! Run once per `Ready` transition against the chat list of the outbound
//! account. A target that looks like a JID is matched against chat ids
//! directly; otherwise names are compared case-insensitively, exact matches
//! first and, in [`MatchMode::Contains`], substring matches after.

use crate::config::MatchMode;
use crate::error::{RelayError, Result};
use crate::transport::ChatInfo;

use super::DestinationHandle;

/// Pick the destination chat for `target` out of `chats`.
///
/// On failure the error lists every candidate name so an operator can fix
/// the configured target.
pub fn resolve_destination(
    chats: &[ChatInfo],
    target: &str,
    mode: MatchMode,
    groups_only: bool,
) -> Result<DestinationHandle> {
    let target = target.trim();
    let candidates: Vec<&ChatInfo> = chats
        .iter()
        .filter(|c| !groups_only || c.is_group)
        .collect();

    let not_found = || RelayError::DestinationNotFound {
        target: target.to_string(),
        available: candidates.iter().map(|c| c.name.clone()).collect(),
    };

    if target.is_empty() {
        return Err(not_found());
    }

    if looks_like_jid(target) {
        if let Some(chat) = candidates.iter().find(|c| c.id == target) {
            return Ok(handle(chat));
        }
    }

    let needle = target.to_lowercase();
    if let Some(chat) = candidates
        .iter()
        .find(|c| c.name.trim().to_lowercase() == needle)
    {
        return Ok(handle(chat));
    }

    if mode == MatchMode::Contains {
        if let Some(chat) = candidates
            .iter()
            .find(|c| c.name.to_lowercase().contains(&needle))
        {
            return Ok(handle(chat));
        }
    }

    Err(not_found())
}

fn looks_like_jid(target: &str) -> bool {
    target.contains('@') && !target.contains(char::is_whitespace)
}

fn handle(chat: &ChatInfo) -> DestinationHandle {
    DestinationHandle {
        id: chat.id.clone(),
        name: chat.name.clone(),
    }
}
