//! EPG (Electronic Program Guide) module
//!
//! Correlates live channels with their current and next program and holds
//! the XMLTV parser.

mod parser;

pub use parser::{parse_xmltv_time, DownloadConfig, EpgDownloader, Guide, XmltvParser};

use crate::error::ProviderError;
use crate::models::{ContentIdentity, ProgramEntry};
use crate::provider::{ChannelKey, ScheduleSource};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Current and next program for one channel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correlation {
    pub current: Option<ProgramEntry>,
    pub next: Option<ProgramEntry>,
}

impl Correlation {
    /// `current` contains `now`, `next` is the earliest entry after it
    pub fn from_entries(entries: &[ProgramEntry], now: i64) -> Self {
        let current = entries.iter().find(|p| p.contains(now)).cloned();
        let next = entries
            .iter()
            .filter(|p| p.start_epoch > now)
            .min_by_key(|p| p.start_epoch)
            .cloned();
        Self { current, next }
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.next.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    CurrentAndNext,
    FullSchedule,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Cached(Correlation),
    /// Issue this fetch and report back through `complete_fetch`
    FetchNeeded(FetchKind),
    /// A fetch for this channel is already running
    Pending,
}

struct CachedPair {
    correlation: Correlation,
    fetched_at: Instant,
}

pub struct ProgramCorrelator {
    pairs: HashMap<ContentIdentity, CachedPair>,
    schedules: HashMap<ContentIdentity, Vec<ProgramEntry>>,
    in_flight: HashSet<ContentIdentity>,
    /// Channels that already got their one full-schedule fallback
    fallback_issued: HashSet<ContentIdentity>,
    refresh_interval: Duration,
    offset_secs: i64,
}

impl ProgramCorrelator {
    pub fn new(refresh_interval: Duration, offset_secs: i64) -> Self {
        Self {
            pairs: HashMap::new(),
            schedules: HashMap::new(),
            in_flight: HashSet::new(),
            fallback_issued: HashSet::new(),
            refresh_interval,
            offset_secs,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Guide time for a wall-clock epoch
    pub fn guide_time(&self, epoch: i64) -> i64 {
        epoch - self.offset_secs
    }

    pub fn current_and_next(&mut self, channel: &ContentIdentity, now: Instant, epoch: i64) -> Lookup {
        let guide_now = self.guide_time(epoch);

        if let Some(pair) = self.pairs.get(channel) {
            if self.pair_is_fresh(pair, now, guide_now) {
                return Lookup::Cached(pair.correlation.clone());
            }
            debug!(channel = %channel, "[EPG] Cached program ended, discarding");
            self.pairs.remove(channel);
        }

        if let Some(schedule) = self.schedules.get(channel) {
            let correlation = Correlation::from_entries(schedule, guide_now);
            if !correlation.is_empty() {
                self.pairs.insert(
                    channel.clone(),
                    CachedPair {
                        correlation: correlation.clone(),
                        fetched_at: now,
                    },
                );
                return Lookup::Cached(correlation);
            }
        }

        if self.in_flight.contains(channel) {
            return Lookup::Pending;
        }
        self.in_flight.insert(channel.clone());
        debug!(channel = %channel, "[EPG] Requesting current/next");
        Lookup::FetchNeeded(FetchKind::CurrentAndNext)
    }

    fn pair_is_fresh(&self, pair: &CachedPair, now: Instant, guide_now: i64) -> bool {
        let c = &pair.correlation;
        match &c.current {
            Some(current) => current.contains(guide_now),
            None => {
                // Gap before the next program, or a negative result
                let waiting = c.next.as_ref().is_some_and(|n| n.start_epoch > guide_now);
                waiting || now.saturating_duration_since(pair.fetched_at) < self.refresh_interval
            }
        }
    }

    /// Apply a fetch result; returns a follow-up fetch to issue
    pub fn complete_fetch(
        &mut self,
        channel: &ContentIdentity,
        kind: FetchKind,
        result: Result<Vec<ProgramEntry>, ProviderError>,
        now: Instant,
        epoch: i64,
    ) -> Option<FetchKind> {
        self.in_flight.remove(channel);
        let guide_now = self.guide_time(epoch);

        let mut entries = match result {
            Ok(entries) => entries,
            Err(e) => {
                warn!(channel = %channel, kind = ?kind, error = %e, "[EPG] Fetch failed");
                Vec::new()
            }
        };
        entries.sort_by_key(|p| p.start_epoch);

        match kind {
            FetchKind::CurrentAndNext => {
                if entries.is_empty() && self.fallback_issued.insert(channel.clone()) {
                    debug!(channel = %channel, "[EPG] Empty current/next, fetching full schedule");
                    self.in_flight.insert(channel.clone());
                    return Some(FetchKind::FullSchedule);
                }
                self.store_pair(channel, Correlation::from_entries(&entries, guide_now), now);
            }
            FetchKind::FullSchedule => {
                self.store_pair(channel, Correlation::from_entries(&entries, guide_now), now);
                if !entries.is_empty() {
                    self.schedules.insert(channel.clone(), entries);
                }
            }
        }
        None
    }

    fn store_pair(&mut self, channel: &ContentIdentity, correlation: Correlation, now: Instant) {
        if correlation.current.is_none() {
            debug!(channel = %channel, "[EPG] Nothing airing now");
        }
        self.pairs.insert(
            channel.clone(),
            CachedPair {
                correlation,
                fetched_at: now,
            },
        );
    }
}

/// Schedule source backed by a downloaded XMLTV guide
pub struct XmltvSchedule {
    programs: HashMap<String, Vec<ProgramEntry>>,
    offset_secs: i64,
}

impl XmltvSchedule {
    pub fn from_guide(guide: Guide) -> Self {
        Self {
            programs: guide.programs,
            offset_secs: 0,
        }
    }

    /// Cut short listings at guide time, matching [`ProgramCorrelator`]
    pub fn with_time_offset(mut self, offset_secs: i64) -> Self {
        self.offset_secs = offset_secs;
        self
    }

    pub fn download(url: &str, config: &DownloadConfig) -> Result<Self, ProviderError> {
        EpgDownloader::download_and_parse(url, config).map(Self::from_guide)
    }

    fn entries_for(&self, channel: &ChannelKey) -> Option<&Vec<ProgramEntry>> {
        channel
            .epg_channel_id
            .as_deref()
            .and_then(|id| self.programs.get(id))
            .or_else(|| self.programs.get(&channel.channel_id))
    }

    fn upcoming(&self, channel: &ChannelKey, epoch: i64) -> Vec<ProgramEntry> {
        let Some(entries) = self.entries_for(channel) else {
            return Vec::new();
        };
        let guide_now = epoch - self.offset_secs;
        let idx = entries.partition_point(|p| p.stop_epoch <= guide_now);
        entries.iter().skip(idx).take(2).cloned().collect()
    }
}

impl ScheduleSource for XmltvSchedule {
    fn fetch_current_and_next(
        &self,
        _profile_id: &str,
        channel: &ChannelKey,
    ) -> Result<Vec<ProgramEntry>, ProviderError> {
        Ok(self.upcoming(channel, chrono::Utc::now().timestamp()))
    }

    fn fetch_full_schedule(
        &self,
        _profile_id: &str,
        channel: &ChannelKey,
    ) -> Result<Vec<ProgramEntry>, ProviderError> {
        Ok(self.entries_for(channel).cloned().unwrap_or_default())
    }
}

/// Format a Unix timestamp as local time HH:MM
pub fn format_time(ts: i64) -> String {
    use chrono::{Local, TimeZone};

    match Local.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%H:%M").to_string(),
        None => "--:--".to_string(),
    }
}
