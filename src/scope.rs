//! Maps query context and query text to a concrete scope, and the scope to
//! a concrete store filter set. Privacy-critical: this module alone decides
//! whether memory files may be searched.

use std::sync::OnceLock;

use regex::Regex;

use crate::store::{ActorType, Role, ScopeFilter, Source};

/// Chat surface shape the ambient session is running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatType {
    Direct,
    Group,
}

/// Resolved scope: `session` (this transcript only), `actor` (this user
/// across sessions; memory files allowed), `global` (no privacy filter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionScope {
    Session,
    Actor,
    Global,
}

/// Ambient context supplied by the tool surface for every query.
#[derive(Debug, Clone, Default)]
pub struct ScopeContext {
    pub session_key: Option<String>,
    pub chat_type: Option<ChatType>,
    pub actor_id: Option<String>,
}

/// Explicit overrides the caller may supply, bypassing auto-resolution.
#[derive(Debug, Clone, Default)]
pub struct ScopeOverrides {
    pub session_scope: Option<SessionScope>,
    pub actor_id: Option<String>,
    pub actor_type: Option<ActorType>,
    pub role: Option<Role>,
}

#[derive(Debug, Clone)]
pub struct ResolvedScope {
    pub scope: SessionScope,
    pub actor_id: Option<String>,
}

fn shared_context_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let tokens = [
            "we", "our", "us", "team", "group", "everyone", "anyone", "all", "channel", "server",
            "thread", "guild", "room", "together", "others", "people",
        ];
        let pattern = format!(r"(?i)\b({})\b", tokens.join("|"));
        Regex::new(&pattern).expect("static shared-context pattern always compiles")
    })
}

fn contains_shared_context_token(query: &str) -> bool {
    shared_context_regex().is_match(query)
}

/// Pure function: for every `(ctx, query, overrides)` this always returns
/// the same resolution.
pub fn resolve_scope(ctx: &ScopeContext, query: &str, overrides: &ScopeOverrides) -> ResolvedScope {
    if let Some(scope) = overrides.session_scope {
        return ResolvedScope {
            scope,
            actor_id: overrides.actor_id.clone(),
        };
    }

    let shared = contains_shared_context_token(query);
    let direct = ctx.chat_type == Some(ChatType::Direct);
    let group = ctx.chat_type == Some(ChatType::Group);

    if shared {
        let scope = if group { SessionScope::Session } else { SessionScope::Global };
        return ResolvedScope { scope, actor_id: None };
    }

    if ctx.actor_id.is_some() && direct {
        return ResolvedScope {
            scope: SessionScope::Actor,
            actor_id: ctx.actor_id.clone(),
        };
    }

    ResolvedScope {
        scope: SessionScope::Session,
        actor_id: None,
    }
}

/// Converts a resolved scope into the concrete store filter. This is the
/// hard privacy rule: `session` excludes memory files entirely.
pub fn scope_to_filter(
    resolved: &ResolvedScope,
    session_key: Option<&str>,
    overrides: &ScopeOverrides,
) -> ScopeFilter {
    let mut filter = ScopeFilter {
        actor_type: overrides.actor_type,
        role: overrides.role,
        ..Default::default()
    };

    match resolved.scope {
        SessionScope::Session => {
            filter.source = Some(Source::Sessions);
            filter.session_key = session_key.map(|s| s.to_string());
        }
        SessionScope::Actor => {
            filter.actor_id_sessions_only = true;
            if let Some(actor_id) = overrides.actor_id.clone().or_else(|| resolved.actor_id.clone()) {
                filter.actor_id = Some(actor_id);
            }
        }
        SessionScope::Global => {}
    }

    filter
}
