use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use url::Url;

use super::{CountLogEntry, CountSink, EntryExitEvent};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct LocationBody {
    capacity: Option<u32>,
}

/// Client for the counts REST backend, bound to one location.
///
/// - `POST {base}/counts/{location}` with `{count, status, timestamp}`
/// - `POST {base}/counts/{location}/entry-exit` with `{type, count, timestamp}`
/// - `GET {base}/locations/{location}` returning `{capacity}`
pub struct RestSink {
    agent: ureq::Agent,
    base: Url,
    location_id: String,
}

impl RestSink {
    pub fn new(base_url: &str, location_id: &str) -> Result<Self> {
        let mut base =
            Url::parse(base_url).with_context(|| format!("invalid backend url {}", base_url))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(anyhow!("backend url must be http or https, got {}", base_url));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        Ok(Self {
            agent,
            base,
            location_id: location_id.to_string(),
        })
    }

    pub fn location_id(&self) -> &str {
        &self.location_id
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("build backend url for {}", path))
    }
}

impl CountSink for RestSink {
    fn record_count(&mut self, entry: &CountLogEntry) -> Result<()> {
        let url = self.endpoint(&format!("counts/{}", self.location_id))?;
        self.agent
            .post(url.as_str())
            .send_json(entry)
            .with_context(|| format!("POST {}", url))?;
        Ok(())
    }

    fn record_entry_exit(&mut self, event: &EntryExitEvent) -> Result<()> {
        let url = self.endpoint(&format!("counts/{}/entry-exit", self.location_id))?;
        self.agent
            .post(url.as_str())
            .send_json(event)
            .with_context(|| format!("POST {}", url))?;
        Ok(())
    }

    fn fetch_capacity(&mut self) -> Result<Option<u32>> {
        let url = self.endpoint(&format!("locations/{}", self.location_id))?;
        let body: LocationBody = self
            .agent
            .get(url.as_str())
            .call()
            .with_context(|| format!("GET {}", url))?
            .into_json()
            .with_context(|| format!("decode {}", url))?;
        Ok(body.capacity)
    }
}
