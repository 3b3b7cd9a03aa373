//! XMLTV parser
//! Streaming, so 100MB+ guides parse without loading the whole file
//! Plain XML and gzip-compressed (.xml.gz) input are both accepted

use crate::error::ProviderError;
use crate::models::ProgramEntry;
use chrono::{DateTime, NaiveDateTime};
use flate2::read::GzDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::time::Duration;
use tracing::{debug, warn};

/// Parsed guide
#[derive(Debug, Clone, Default)]
pub struct Guide {
    /// Display names indexed by channel ID
    pub channels: HashMap<String, String>,
    /// Programs indexed by channel ID, sorted by start
    pub programs: HashMap<String, Vec<ProgramEntry>>,
    /// First parse errors (up to 50)
    pub parse_errors: Vec<String>,
    pub parse_error_count: usize,
}

impl Guide {
    pub fn program_count(&self) -> usize {
        self.programs.values().map(|v| v.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParserState {
    Root,
    Channel,
    Programme,
    Title,
    Desc,
    Category,
    DisplayName,
}

impl ParserState {
    fn captures_text(&self) -> bool {
        matches!(
            self,
            ParserState::Title | ParserState::Desc | ParserState::Category | ParserState::DisplayName
        )
    }
}

/// Programme being built, with the channel it belongs to
struct PendingProgramme {
    channel_id: String,
    entry: ProgramEntry,
}

pub struct XmltvParser;

impl XmltvParser {
    pub fn parse(xml: &str) -> Guide {
        Self::parse_reader(xml.as_bytes())
    }

    /// Parse from a buffered reader; malformed elements are skipped
    pub fn parse_reader<R: BufRead>(reader: R) -> Guide {
        let mut xml_reader = Reader::from_reader(reader);
        // Entity refs arrive as separate events, so spaces around them matter
        xml_reader.config_mut().trim_text(false);

        let mut guide = Guide::default();
        let mut buf = Vec::with_capacity(8192);

        let mut state = ParserState::Root;
        let mut channel: Option<(String, String)> = None;
        let mut programme: Option<PendingProgramme> = None;
        let mut text_buf = String::new();

        loop {
            let position = xml_reader.buffer_position();
            match xml_reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    state = Self::open_element(e, state, &mut channel, &mut programme);
                    if state.captures_text() {
                        text_buf.clear();
                    }
                }
                Ok(Event::Text(e)) => {
                    if state.captures_text() {
                        text_buf.push_str(&String::from_utf8_lossy(e.as_ref()));
                    }
                }
                Ok(Event::CData(e)) => {
                    if state.captures_text() {
                        text_buf.push_str(&String::from_utf8_lossy(e.as_ref()));
                    }
                }
                Ok(Event::GeneralRef(e)) => {
                    if state.captures_text() {
                        match e.resolve_char_ref() {
                            Ok(Some(c)) => text_buf.push(c),
                            _ => text_buf.push_str(named_entity(&String::from_utf8_lossy(e.as_ref()))),
                        }
                    }
                }
                Ok(Event::End(ref e)) => {
                    let text = text_buf.trim().to_string();
                    match e.name().as_ref() {
                        b"channel" => {
                            if let Some((id, name)) = channel.take() {
                                if !id.is_empty() {
                                    guide.channels.insert(id, name);
                                }
                            }
                            state = ParserState::Root;
                        }
                        b"programme" => {
                            if let Some(p) = programme.take() {
                                if !p.channel_id.is_empty()
                                    && !p.entry.title.is_empty()
                                    && p.entry.stop_epoch > p.entry.start_epoch
                                {
                                    guide.programs.entry(p.channel_id).or_default().push(p.entry);
                                }
                            }
                            state = ParserState::Root;
                        }
                        b"title" if state == ParserState::Title => {
                            if let Some(p) = programme.as_mut() {
                                // First title wins; later ones are translations
                                if p.entry.title.is_empty() {
                                    p.entry.title = text;
                                }
                            }
                            state = ParserState::Programme;
                        }
                        b"desc" if state == ParserState::Desc => {
                            if let Some(p) = programme.as_mut() {
                                if !text.is_empty() && p.entry.description.is_none() {
                                    p.entry.description = Some(text);
                                }
                            }
                            state = ParserState::Programme;
                        }
                        b"category" if state == ParserState::Category => {
                            if let Some(p) = programme.as_mut() {
                                if !text.is_empty() && p.entry.category.is_none() {
                                    p.entry.category = Some(text);
                                }
                            }
                            state = ParserState::Programme;
                        }
                        b"display-name" if state == ParserState::DisplayName => {
                            if let Some((_, name)) = channel.as_mut() {
                                if name.is_empty() {
                                    *name = text;
                                }
                            }
                            state = ParserState::Channel;
                        }
                        _ => {}
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    guide.parse_error_count += 1;
                    if guide.parse_errors.len() < 50 {
                        guide
                            .parse_errors
                            .push(format!("XML error at byte {}: {}", position, e));
                    }
                    // Skip the malformed element
                    channel = None;
                    programme = None;
                    state = ParserState::Root;
                    text_buf.clear();
                }
                _ => {}
            }
            buf.clear();
        }

        for programs in guide.programs.values_mut() {
            programs.sort_by_key(|p| p.start_epoch);
        }

        if guide.parse_error_count > 0 {
            warn!(
                errors = guide.parse_error_count,
                "[EPG] Guide parsed with errors"
            );
        }
        debug!(
            channels = guide.channels.len(),
            programs = guide.program_count(),
            "[EPG] Guide parsed"
        );
        guide
    }

    fn open_element(
        e: &BytesStart,
        state: ParserState,
        channel: &mut Option<(String, String)>,
        programme: &mut Option<PendingProgramme>,
    ) -> ParserState {
        match e.name().as_ref() {
            b"channel" => {
                let id = get_attribute(e, b"id").unwrap_or_default();
                *channel = Some((id, String::new()));
                ParserState::Channel
            }
            b"programme" => {
                let channel_id = get_attribute(e, b"channel").unwrap_or_default();
                let start = get_attribute(e, b"start")
                    .and_then(|s| parse_xmltv_time(&s))
                    .unwrap_or(0);
                let stop = get_attribute(e, b"stop")
                    .and_then(|s| parse_xmltv_time(&s))
                    .unwrap_or(0);
                *programme = Some(PendingProgramme {
                    channel_id,
                    entry: ProgramEntry {
                        title: String::new(),
                        description: None,
                        start_epoch: start,
                        stop_epoch: stop,
                        category: None,
                    },
                });
                ParserState::Programme
            }
            b"title" if state == ParserState::Programme => ParserState::Title,
            b"desc" if state == ParserState::Programme => ParserState::Desc,
            b"category" if state == ParserState::Programme => ParserState::Category,
            b"display-name" if state == ParserState::Channel => ParserState::DisplayName,
            _ => state,
        }
    }

    /// Parse plain or gzip input, sniffing the gzip magic bytes
    pub fn parse_any<R: Read>(reader: R) -> Result<Guide, ProviderError> {
        let mut reader = BufReader::with_capacity(64 * 1024, reader);
        let magic = reader
            .fill_buf()
            .map_err(|e| ProviderError::Epg(format!("Read failed: {}", e)))?;
        let gzip = magic.len() >= 2 && magic[0] == 0x1f && magic[1] == 0x8b;

        if gzip {
            let decoder = GzDecoder::new(reader);
            let buffered = BufReader::with_capacity(64 * 1024, decoder);
            Ok(Self::parse_reader(SanitizingBufReader::new(buffered)))
        } else {
            Ok(Self::parse_reader(SanitizingBufReader::new(reader)))
        }
    }
}

/// BufReader wrapper that filters out illegal XML 1.0 characters on read
/// Also escapes bare ampersands, which are common in provider guides
struct SanitizingBufReader<R> {
    inner: R,
    buffer: Vec<u8>,
    out_buffer: Vec<u8>,
    pos: usize,
    filled: usize,
}

impl<R: Read> SanitizingBufReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: vec![0u8; 64 * 1024],
            out_buffer: Vec::with_capacity(96 * 1024),
            pos: 0,
            filled: 0,
        }
    }

    fn sanitize_byte(b: u8) -> u8 {
        match b {
            0x09 | 0x0A | 0x0D => b,
            0x00..=0x1F | 0x7F => 0x20,
            _ => b,
        }
    }

    fn refill_buffer(&mut self) -> std::io::Result<()> {
        let n = loop {
            match self.inner.read(&mut self.buffer) {
                Ok(n) => break n,
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        self.out_buffer.clear();

        for i in 0..n {
            let b = Self::sanitize_byte(self.buffer[i]);
            if b == b'&' && !Self::is_valid_entity_start(&self.buffer[i..n]) {
                self.out_buffer.extend_from_slice(b"&amp;");
                continue;
            }
            self.out_buffer.push(b);
        }

        self.pos = 0;
        self.filled = self.out_buffer.len();
        Ok(())
    }

    /// Whether `&...` looks like `&#123;` or `&name;`
    fn is_valid_entity_start(bytes: &[u8]) -> bool {
        if bytes.len() < 2 {
            return false;
        }
        if bytes[1] == b'#' {
            return true;
        }
        let mut end = 1;
        while end < bytes.len() && end < 10 {
            match bytes[end] {
                b';' => return end > 1,
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' => end += 1,
                _ => return false,
            }
        }
        false
    }
}

impl<R: Read> Read for SanitizingBufReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.filled {
            self.refill_buffer()?;
            if self.filled == 0 {
                return Ok(0);
            }
        }
        let available = self.filled - self.pos;
        let to_copy = available.min(buf.len());
        buf[..to_copy].copy_from_slice(&self.out_buffer[self.pos..self.pos + to_copy]);
        self.pos += to_copy;
        Ok(to_copy)
    }
}

impl<R: Read> BufRead for SanitizingBufReader<R> {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        if self.pos >= self.filled {
            self.refill_buffer()?;
        }
        Ok(&self.out_buffer[self.pos..self.filled])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.filled);
    }
}

fn named_entity(name: &str) -> &'static str {
    match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        _ => "",
    }
}

/// Decode entities in an attribute value
fn decode_xml_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find('&') {
        result.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find(';') else {
            result.push_str(tail);
            return result;
        };
        let entity = &tail[1..end];
        let decoded = if let Some(num) = entity.strip_prefix('#') {
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => num.parse::<u32>().ok(),
            };
            code.and_then(char::from_u32).map(|c| c.to_string())
        } else {
            Some(named_entity(entity).to_string()).filter(|s| !s.is_empty())
        };
        match decoded {
            Some(text) => result.push_str(&text),
            None => result.push_str(&tail[..=end]),
        }
        rest = &tail[end + 1..];
    }
    result.push_str(rest);
    result
}

fn get_attribute(e: &BytesStart, name: &[u8]) -> Option<String> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == name {
            let raw = String::from_utf8(attr.value.as_ref().to_vec()).ok()?;
            return Some(decode_xml_entities(&raw));
        }
    }
    None
}

/// XMLTV time ("20240115120000 +0000") to a Unix timestamp
///
/// A missing zone is read as UTC.
pub fn parse_xmltv_time(time_str: &str) -> Option<i64> {
    let time_str = time_str.trim();
    if time_str.len() < 14 || !time_str.is_char_boundary(14) {
        return None;
    }
    let (datetime, zone) = time_str.split_at(14);
    let zone = zone.trim();

    if zone.is_empty() {
        return NaiveDateTime::parse_from_str(datetime, "%Y%m%d%H%M%S")
            .ok()
            .map(|dt| dt.and_utc().timestamp());
    }
    DateTime::parse_from_str(&format!("{} {}", datetime, zone), "%Y%m%d%H%M%S %z")
        .ok()
        .map(|dt| dt.timestamp())
}

/// Download settings for remote guides
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 2000,
            connect_timeout_secs: 30,
            read_timeout_secs: 120,
            user_agent: "XtremeIPTV/1.0".to_string(),
        }
    }
}

pub struct EpgDownloader;

impl EpgDownloader {
    fn create_agent(config: &DownloadConfig) -> ureq::Agent {
        ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.read_timeout_secs)))
            .timeout_connect(Some(Duration::from_secs(config.connect_timeout_secs)))
            .max_idle_connections(4)
            .max_idle_connections_per_host(2)
            .build()
            .new_agent()
    }

    /// Download and parse a guide, retrying failed requests
    pub fn download_and_parse(url: &str, config: &DownloadConfig) -> Result<Guide, ProviderError> {
        let agent = Self::create_agent(config);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match Self::try_download(&agent, url, config) {
                Ok(guide) => return Ok(guide),
                Err(e) if attempts >= config.max_retries => {
                    warn!(url = %url, attempts, error = %e, "[EPG] Download failed");
                    return Err(e);
                }
                Err(e) => {
                    debug!(url = %url, attempt = attempts, error = %e, "[EPG] Retrying download");
                    std::thread::sleep(Duration::from_millis(config.retry_delay_ms));
                }
            }
        }
    }

    fn try_download(
        agent: &ureq::Agent,
        url: &str,
        config: &DownloadConfig,
    ) -> Result<Guide, ProviderError> {
        let response = agent
            .get(url)
            .header("User-Agent", &config.user_agent)
            .call()?;

        let status = response.status().as_u16();
        if status != 200 && status != 206 {
            return Err(ProviderError::Status(status));
        }

        let reader = response.into_body().into_reader();
        XmltvParser::parse_any(reader)
    }
}
