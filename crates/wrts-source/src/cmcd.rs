use url::Url;
use wrts_net::Headers;

/// How client metrics ride along with each request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CmcdMode {
    #[default]
    Off,
    /// Single `cmcd=<encoded>` query parameter, short key set.
    Query,
    /// `CMCD-*` request headers, full key set.
    Headers,
}

/// Per-request metric snapshot supplied by the source.
#[derive(Clone, Debug, Default)]
pub struct CmcdContext {
    /// Encoded bitrate of the requested object, kbit/s.
    pub bitrate_kbps: Option<u64>,
    /// Buffer length, ms.
    pub buffer_ms: u64,
    /// Measured throughput, kbit/s.
    pub throughput_kbps: Option<u64>,
    pub playback_rate: f64,
    /// The buffer is empty and playback is blocked on this request.
    pub buffer_empty: bool,
    /// `a`, `v`, or other.
    pub object_type: Option<char>,
    /// Deadline: remaining buffer at current rate, ms.
    pub deadline_ms: Option<u64>,
    pub content_id: Option<String>,
}

/// Common Media Client Data reporter.
///
/// Keeps the session id and the starvation latch: `bs` stays on from a stall
/// until the first successful request after it.
#[derive(Clone, Debug)]
pub struct Cmcd {
    mode: CmcdMode,
    session_id: String,
    starved: bool,
}

impl Cmcd {
    pub fn new(mode: CmcdMode, session_id: String) -> Self {
        Self {
            mode,
            session_id,
            starved: false,
        }
    }

    pub fn mode(&self) -> CmcdMode {
        self.mode
    }

    /// A stall happened; latch the starvation flag.
    pub fn note_stall(&mut self) {
        self.starved = true;
    }

    /// A request completed successfully; release the latch.
    pub fn note_success(&mut self) {
        self.starved = false;
    }

    /// Attach the metrics to an outgoing request.
    pub fn apply(&self, url: &mut Url, headers: &mut Headers, ctx: &CmcdContext) {
        match self.mode {
            CmcdMode::Off => {}
            CmcdMode::Query => {
                let payload = self.encode(ctx, false);
                url.query_pairs_mut().append_pair("cmcd", &payload);
            }
            CmcdMode::Headers => {
                for (name, keys) in [
                    ("cmcd-object", &["br", "ot"][..]),
                    ("cmcd-request", &["bl", "dl", "mtp", "su"][..]),
                    ("cmcd-session", &["cid", "pr", "sf", "sid", "st", "v"][..]),
                    ("cmcd-status", &["bs"][..]),
                ] {
                    let payload = self.encode_keys(ctx, true, keys);
                    if !payload.is_empty() {
                        headers.insert(name, payload);
                    }
                }
            }
        }
    }

    fn encode(&self, ctx: &CmcdContext, full: bool) -> String {
        self.encode_keys(
            ctx,
            full,
            &[
                "bl", "br", "bs", "cid", "dl", "mtp", "ot", "pr", "sf", "sid", "st", "su", "v",
            ],
        )
    }

    /// Serialize the selected keys, alphabetically, comma separated.
    /// Boolean keys appear bare when true and are omitted when false.
    fn encode_keys(&self, ctx: &CmcdContext, full: bool, keys: &[&str]) -> String {
        let mut parts: Vec<String> = Vec::new();
        for key in keys {
            match *key {
                "br" => {
                    if let Some(br) = ctx.bitrate_kbps {
                        parts.push(format!("br={br}"));
                    }
                }
                "bl" => parts.push(format!("bl={}", ctx.buffer_ms)),
                "bs" => {
                    if self.starved {
                        parts.push("bs".into());
                    }
                }
                "mtp" => {
                    if let Some(mtp) = ctx.throughput_kbps {
                        parts.push(format!("mtp={mtp}"));
                    }
                }
                "pr" => {
                    if (ctx.playback_rate - 1.0).abs() > f64::EPSILON {
                        parts.push(format!("pr={:.2}", ctx.playback_rate));
                    }
                }
                "sf" => parts.push("sf=o".into()),
                "sid" => parts.push(format!("sid={:?}", self.session_id)),
                "su" => {
                    if ctx.buffer_empty {
                        parts.push("su".into());
                    }
                }
                "cid" if full => {
                    if let Some(cid) = &ctx.content_id {
                        parts.push(format!("cid={cid:?}"));
                    }
                }
                "dl" if full => {
                    if let Some(dl) = ctx.deadline_ms {
                        parts.push(format!("dl={dl}"));
                    }
                }
                "ot" if full => {
                    if let Some(ot) = ctx.object_type {
                        parts.push(format!("ot={ot}"));
                    }
                }
                "st" if full => parts.push("st=l".into()),
                "v" if full => parts.push("v=1".into()),
                _ => {}
            }
        }
        parts.sort();
        parts.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CmcdContext {
        CmcdContext {
            bitrate_kbps: Some(3200),
            buffer_ms: 420,
            throughput_kbps: Some(5000),
            playback_rate: 1.0,
            buffer_empty: false,
            object_type: Some('v'),
            deadline_ms: Some(420),
            content_id: Some("ch1".into()),
        }
    }

    #[test]
    fn query_mode_appends_one_parameter() {
        let cmcd = Cmcd::new(CmcdMode::Query, "sess-1".into());
        let mut url = Url::parse("http://example.com/s/1/100.rts").unwrap();
        let mut headers = Headers::new();
        cmcd.apply(&mut url, &mut headers, &ctx());

        let query = url.query().unwrap();
        assert!(query.starts_with("cmcd="));
        assert!(headers.is_empty());

        let decoded: String =
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(k, _)| k == "cmcd")
                .map(|(_, v)| v.into_owned())
                .unwrap();
        assert!(decoded.contains("br=3200"));
        assert!(decoded.contains("bl=420"));
        assert!(decoded.contains("mtp=5000"));
        assert!(decoded.contains("sf=o"));
        assert!(decoded.contains("sid=\"sess-1\""));
        // Short mode: no full-mode keys.
        assert!(!decoded.contains("st=l"));
        assert!(!decoded.contains("v=1"));
    }

    #[test]
    fn header_mode_splits_by_category() {
        let cmcd = Cmcd::new(CmcdMode::Headers, "sess-1".into());
        let mut url = Url::parse("http://example.com/s/1/100.rts").unwrap();
        let mut headers = Headers::new();
        cmcd.apply(&mut url, &mut headers, &ctx());

        assert!(url.query().is_none());
        assert!(headers.get("cmcd-object").unwrap().contains("ot=v"));
        assert!(headers.get("cmcd-request").unwrap().contains("bl=420"));
        let session = headers.get("cmcd-session").unwrap();
        assert!(session.contains("st=l"));
        assert!(session.contains("v=1"));
        assert!(session.contains("cid=\"ch1\""));
        // Not starved: no status header at all.
        assert!(headers.get("cmcd-status").is_none());
    }

    fn cmcd_param(url: &Url) -> String {
        url::form_urlencoded::parse(url.query().unwrap_or_default().as_bytes())
            .find(|(k, _)| k == "cmcd")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default()
    }

    #[test]
    fn starvation_latches_until_success() {
        let mut cmcd = Cmcd::new(CmcdMode::Query, "s".into());
        cmcd.note_stall();

        let mut url = Url::parse("http://example.com/a").unwrap();
        let mut headers = Headers::new();
        cmcd.apply(&mut url, &mut headers, &CmcdContext::default());
        assert!(cmcd_param(&url).split(',').any(|p| p == "bs"));

        cmcd.note_success();
        let mut url2 = Url::parse("http://example.com/a").unwrap();
        cmcd.apply(&mut url2, &mut headers, &CmcdContext::default());
        assert!(!cmcd_param(&url2).split(',').any(|p| p == "bs"));
    }

    #[test]
    fn nondefault_rate_is_reported() {
        let cmcd = Cmcd::new(CmcdMode::Query, "s".into());
        let mut c = ctx();
        c.playback_rate = 0.92;
        let mut url = Url::parse("http://example.com/a").unwrap();
        let mut headers = Headers::new();
        cmcd.apply(&mut url, &mut headers, &c);
        assert!(cmcd_param(&url).contains("pr=0.92"));
    }
}
