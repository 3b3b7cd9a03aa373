//! Stream URL resolution with memoization and staleness tickets

use crate::engine::{classify, Capabilities, ResolvedStream};
use crate::error::ProviderError;
use crate::models::{ContentIdentity, ContentKind, ContentReference};
use crate::provider::{ContentTypeTag, ResolveRequest};
use tracing::{debug, info, warn};

/// Identifies one outbound resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveTicket(u64);

#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    /// Explicit URL, no outbound call needed
    Ready(ResolvedStream),
    /// Already resolved for this identity
    Unchanged,
    /// Caller must issue exactly this request and report back with the ticket
    Dispatch {
        request: ResolveRequest,
        ticket: ResolveTicket,
    },
    /// A request for this identity is running
    InFlight,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Applied(ResolvedStream),
    /// Provider failed; render "stream unavailable"
    Unavailable(String),
    /// Superseded by a newer selection
    Stale,
}

struct Pending {
    ticket: ResolveTicket,
    identity: ContentIdentity,
}

pub struct StreamResolver {
    profile_id: String,
    next_ticket: u64,
    last_resolved: Option<(ContentIdentity, ResolvedStream)>,
    in_flight: Option<Pending>,
}

impl StreamResolver {
    pub fn new(profile_id: &str) -> Self {
        Self {
            profile_id: profile_id.to_string(),
            next_ticket: 0,
            last_resolved: None,
            in_flight: None,
        }
    }

    /// Stream resolved for `identity`, if memoized
    pub fn resolved_for(&self, identity: &ContentIdentity) -> Option<&ResolvedStream> {
        match &self.last_resolved {
            Some((id, stream)) if id == identity => Some(stream),
            _ => None,
        }
    }

    pub fn resolve(
        &mut self,
        identity: &ContentIdentity,
        reference: &ContentReference,
        caps: Capabilities,
    ) -> ResolveOutcome {
        if let Some(url) = reference.explicit_url.as_deref().filter(|u| !u.is_empty()) {
            let stream = ResolvedStream {
                url: url.to_string(),
                delivery_mode: classify(url, identity.kind, caps),
            };
            // A newer explicit selection supersedes anything in flight
            self.in_flight = None;
            if self.resolved_for(identity) == Some(&stream) {
                return ResolveOutcome::Unchanged;
            }
            debug!(identity = %identity, url = %url, "[RESOLVE] Explicit URL");
            self.last_resolved = Some((identity.clone(), stream.clone()));
            return ResolveOutcome::Ready(stream);
        }

        if self.resolved_for(identity).is_some() {
            return ResolveOutcome::Unchanged;
        }

        if let Some(pending) = &self.in_flight {
            if &pending.identity == identity {
                return ResolveOutcome::InFlight;
            }
        }

        let tag = content_type_tag(identity.kind);
        let request = ResolveRequest {
            profile_id: self.profile_id.clone(),
            tag,
            content_id: identity.id.clone(),
            default_extension: tag.default_extension().to_string(),
            container_hint: reference.container_hint().map(str::to_string),
        };

        self.next_ticket += 1;
        let ticket = ResolveTicket(self.next_ticket);
        self.in_flight = Some(Pending {
            ticket,
            identity: identity.clone(),
        });

        info!(identity = %identity, tag = %tag, "[RESOLVE] Requesting stream URL");
        ResolveOutcome::Dispatch { request, ticket }
    }

    /// Apply a finished request
    pub fn complete(
        &mut self,
        ticket: ResolveTicket,
        result: Result<String, ProviderError>,
        caps: Capabilities,
    ) -> Completion {
        let pending = match self.in_flight.take() {
            Some(p) if p.ticket == ticket => p,
            other => {
                self.in_flight = other;
                debug!("[RESOLVE] Dropping stale resolution");
                return Completion::Stale;
            }
        };

        match result {
            Ok(url) if !url.is_empty() => {
                let stream = ResolvedStream {
                    delivery_mode: classify(&url, pending.identity.kind, caps),
                    url,
                };
                info!(identity = %pending.identity, url = %stream.url, mode = ?stream.delivery_mode, "[RESOLVE] Resolved");
                self.last_resolved = Some((pending.identity, stream.clone()));
                Completion::Applied(stream)
            }
            Ok(_) => {
                warn!(identity = %pending.identity, "[RESOLVE] Provider returned an empty URL");
                Completion::Unavailable("empty stream URL".to_string())
            }
            Err(e) => {
                warn!(identity = %pending.identity, error = %e, "[RESOLVE] Failed");
                Completion::Unavailable(e.to_string())
            }
        }
    }

    /// Forget the in-flight request and the memo
    pub fn clear(&mut self) {
        self.in_flight = None;
        self.last_resolved = None;
    }

    /// Drop the in-flight request, keeping the memo
    pub fn cancel_in_flight(&mut self) {
        self.in_flight = None;
    }
}

fn content_type_tag(kind: ContentKind) -> ContentTypeTag {
    match kind {
        ContentKind::Channel | ContentKind::LiveChannel => ContentTypeTag::Live,
        ContentKind::Movie => ContentTypeTag::Movie,
        ContentKind::Episode => ContentTypeTag::Series,
    }
}
