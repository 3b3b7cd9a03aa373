//! Xtream Codes API client

use crate::error::ProviderError;
use crate::models::{EpisodeEntry, ProgramEntry};
use crate::provider::{
    ChannelKey, ContentTypeTag, EpisodeListSource, ResolveRequest, ScheduleSource, StreamSource,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::NaiveDateTime;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub struct XtreamClient {
    server: String,
    username: String,
    password: String,
    user_agent: String,
    use_post: bool,
    agent: ureq::Agent,
}

impl XtreamClient {
    pub fn new(server: &str, username: &str, password: &str) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(30)))
            .timeout_connect(Some(Duration::from_secs(10)))
            .build()
            .new_agent();
        Self {
            server: server.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            use_post: false,
            agent,
        }
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    /// Send credentials as a form body instead of the query string
    pub fn with_post_method(mut self, use_post: bool) -> Self {
        self.use_post = use_post;
        self
    }

    fn api_url(&self, action: Option<&str>, params: &[(&str, &str)]) -> Result<Url, ProviderError> {
        let base = format!("{}/player_api.php", self.server);
        let mut query: Vec<(&str, &str)> =
            vec![("username", self.username.as_str()), ("password", self.password.as_str())];
        if let Some(action) = action {
            query.push(("action", action));
        }
        query.extend_from_slice(params);
        Url::parse_with_params(&base, query)
            .map_err(|e| ProviderError::Malformed(format!("bad server URL: {}", e)))
    }

    fn get_json(&self, action: Option<&str>, params: &[(&str, &str)]) -> Result<Value, ProviderError> {
        debug!(action = action.unwrap_or("account"), "[API] Request");
        let result = if self.use_post {
            let url = format!("{}/player_api.php", self.server);
            let mut form: Vec<(&str, &str)> =
                vec![("username", self.username.as_str()), ("password", self.password.as_str())];
            if let Some(action) = action {
                form.push(("action", action));
            }
            form.extend_from_slice(params);
            self.agent
                .post(&url)
                .header("User-Agent", &self.user_agent)
                .send_form(form)
        } else {
            let url = self.api_url(action, params)?;
            self.agent
                .get(url.as_str())
                .header("User-Agent", &self.user_agent)
                .call()
        };

        let mut response = match result {
            Ok(response) => response,
            Err(ureq::Error::StatusCode(code)) => return Err(ProviderError::Status(code)),
            Err(e) => return Err(e.into()),
        };
        let body = response.body_mut().read_to_string()?;
        Ok(serde_json::from_str(&body)?)
    }

    pub fn get_account_info(&self) -> Result<Value, ProviderError> {
        self.get_json(None, &[])
    }

    pub fn get_vod_info(&self, vod_id: &str) -> Result<Value, ProviderError> {
        self.get_json(Some("get_vod_info"), &[("vod_id", vod_id)])
    }

    pub fn get_series_info(&self, series_id: i64) -> Result<Value, ProviderError> {
        let id = series_id.to_string();
        self.get_json(Some("get_series_info"), &[("series_id", id.as_str())])
    }

    pub fn get_short_epg(&self, stream_id: &str, limit: usize) -> Result<Value, ProviderError> {
        let limit = limit.to_string();
        self.get_json(
            Some("get_short_epg"),
            &[("stream_id", stream_id), ("limit", limit.as_str())],
        )
    }

    pub fn get_simple_data_table(&self, stream_id: &str) -> Result<Value, ProviderError> {
        self.get_json(Some("get_simple_data_table"), &[("stream_id", stream_id)])
    }

    /// `{server}/{type}/{user}/{pass}/{id}.{ext}`
    pub fn stream_url(&self, tag: ContentTypeTag, id: &str, extension: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}.{}",
            self.server,
            tag.path_segment(),
            self.username,
            self.password,
            id,
            extension
        )
    }

    /// Container of a VOD entry according to `get_vod_info`
    fn vod_container(&self, vod_id: &str) -> Result<Option<String>, ProviderError> {
        let info = self.get_vod_info(vod_id)?;
        Ok(info
            .get("movie_data")
            .and_then(|m| m.get("container_extension"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string))
    }
}

impl StreamSource for XtreamClient {
    fn resolve_stream_url(&self, request: &ResolveRequest) -> Result<String, ProviderError> {
        let extension = match (&request.container_hint, request.tag) {
            (Some(hint), _) if !hint.is_empty() => hint.clone(),
            (_, ContentTypeTag::Movie) => self
                .vod_container(&request.content_id)?
                .unwrap_or_else(|| request.default_extension.clone()),
            _ => request.default_extension.clone(),
        };
        Ok(self.stream_url(request.tag, &request.content_id, &extension))
    }
}

impl ScheduleSource for XtreamClient {
    fn fetch_current_and_next(
        &self,
        _profile_id: &str,
        channel: &ChannelKey,
    ) -> Result<Vec<ProgramEntry>, ProviderError> {
        let stream_id = numeric_stream_id(channel)?;
        let json = self.get_short_epg(stream_id, 2)?;
        Ok(parse_listings(&json))
    }

    fn fetch_full_schedule(
        &self,
        _profile_id: &str,
        channel: &ChannelKey,
    ) -> Result<Vec<ProgramEntry>, ProviderError> {
        let stream_id = numeric_stream_id(channel)?;
        let json = self.get_simple_data_table(stream_id)?;
        Ok(parse_listings(&json))
    }
}

impl EpisodeListSource for XtreamClient {
    fn fetch_series_episodes(
        &self,
        _profile_id: &str,
        series_id: i64,
    ) -> Result<Vec<EpisodeEntry>, ProviderError> {
        let info = self.get_series_info(series_id)?;
        parse_series_episodes(&info)
    }
}

/// Guide endpoints only know Xtream stream ids
fn numeric_stream_id(channel: &ChannelKey) -> Result<&str, ProviderError> {
    if channel.channel_id.parse::<i64>().is_ok() {
        Ok(&channel.channel_id)
    } else {
        Err(ProviderError::Unsupported("guide lookup for playlist channels"))
    }
}

/// Integer that may arrive as a JSON number or a string
fn json_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Titles and descriptions come base64-encoded from most panels
fn decode_text(value: &Value) -> Option<String> {
    let raw = value.as_str()?.trim();
    if raw.is_empty() {
        return None;
    }
    let text = match STANDARD.decode(raw) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| raw.to_string()),
        Err(_) => raw.to_string(),
    };
    Some(text.trim().to_string())
}

fn listing_time(entry: &Value, timestamp_key: &str, text_key: &str) -> Option<i64> {
    if let Some(ts) = entry.get(timestamp_key).and_then(json_i64) {
        return Some(ts);
    }
    let text = entry.get(text_key)?.as_str()?;
    NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// Parse an `epg_listings` payload, sorted by start
pub fn parse_listings(json: &Value) -> Vec<ProgramEntry> {
    let Some(listings) = json.get("epg_listings").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut programs: Vec<ProgramEntry> = listings
        .iter()
        .filter_map(|entry| {
            let title = entry.get("title").and_then(decode_text)?;
            let start = listing_time(entry, "start_timestamp", "start")?;
            let stop = listing_time(entry, "stop_timestamp", "end")?;
            if stop <= start {
                return None;
            }
            Some(ProgramEntry {
                title,
                description: entry.get("description").and_then(decode_text),
                start_epoch: start,
                stop_epoch: stop,
                category: None,
            })
        })
        .collect();

    programs.sort_by_key(|p| p.start_epoch);
    programs
}

/// Flatten the per-season `episodes` map of `get_series_info`
pub fn parse_series_episodes(info: &Value) -> Result<Vec<EpisodeEntry>, ProviderError> {
    let seasons = match info.get("episodes") {
        Some(Value::Object(map)) => map,
        // Some panels send an empty list instead of an empty map
        Some(Value::Array(list)) if list.is_empty() => return Ok(Vec::new()),
        _ => return Err(ProviderError::Malformed("series info has no episodes".to_string())),
    };

    let mut episodes = Vec::new();
    for (season_key, list) in seasons {
        let Some(list) = list.as_array() else {
            continue;
        };
        let season_from_key = season_key.parse::<i32>().ok();
        for ep in list {
            let Some(id) = ep.get("id").and_then(json_i64) else {
                warn!(season = %season_key, "[API] Episode without id skipped");
                continue;
            };
            let season = ep
                .get("season")
                .and_then(json_i64)
                .map(|s| s as i32)
                .or(season_from_key)
                .unwrap_or(0);
            episodes.push(EpisodeEntry {
                id,
                title: ep
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown")
                    .to_string(),
                season,
                episode_num: ep.get("episode_num").and_then(json_i64).unwrap_or(0) as i32,
                container_extension: ep
                    .get("container_extension")
                    .and_then(Value::as_str)
                    .unwrap_or("mp4")
                    .to_string(),
            });
        }
    }

    episodes.sort_by_key(|e| (e.season, e.episode_num));
    Ok(episodes)
}
