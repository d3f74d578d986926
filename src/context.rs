use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Parsed inbound email handed to the cascade.
///
/// Built once per analysis request by the caller and never mutated by the
/// engine. MIME part decoding happens outside the crate; see
/// [`EmailContext::from_raw`] for the header-level parser.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailContext {
    pub id: String,
    pub sender: String,        // Envelope or From address
    pub sender_domain: String, // Derived from sender when empty
    pub subject: String,
    pub body: String,
    pub raw_content: String,
    pub attachments: Vec<Attachment>,
    pub headers: HashMap<String, String>,
    pub authentication: AuthenticationResults,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub sha256: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthenticationResults {
    pub spf: Option<String>,
    pub dkim: Option<String>,
    pub dmarc: Option<String>,
}

impl EmailContext {
    pub fn new(id: &str, sender: &str, subject: &str, body: &str) -> Self {
        Self {
            id: id.to_string(),
            sender: sender.to_string(),
            sender_domain: extract_domain(sender).unwrap_or_default(),
            subject: subject.to_string(),
            body: body.to_string(),
            ..Default::default()
        }
    }

    pub fn with_attachment(mut self, filename: &str, content_type: &str) -> Self {
        self.attachments.push(Attachment {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            ..Default::default()
        });
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_raw_content(mut self, raw: &str) -> Self {
        self.raw_content = raw.to_string();
        self
    }

    /// Fill in derived fields after deserialization.
    pub fn normalized(mut self) -> Self {
        if self.sender_domain.is_empty() {
            self.sender_domain = extract_domain(&self.sender).unwrap_or_default();
        }
        if self.id.is_empty() {
            self.id = "unknown".to_string();
        }
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name_lower)
            .map(|(_, v)| v.as_str())
    }

    /// Subject and body joined for keyword scanning
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.subject, self.body)
    }

    /// Build a context from an RFC 822 message. Only the header block is
    /// interpreted; the body is kept verbatim and attachments are not
    /// extracted.
    pub fn from_raw(raw: &str) -> Self {
        let mut headers: HashMap<String, String> = HashMap::new();
        let mut last_header_key: Option<String> = None;
        let mut body = String::new();
        let mut in_headers = true;

        for line in raw.lines() {
            if in_headers {
                if line.trim().is_empty() {
                    in_headers = false;
                    continue;
                }

                if line.starts_with(' ') || line.starts_with('\t') {
                    // Folded header continuation
                    if let Some(existing) = last_header_key.as_ref().and_then(|k| headers.get_mut(k)) {
                        existing.push(' ');
                        existing.push_str(line.trim());
                    }
                    continue;
                }

                if let Some((key, value)) = line.split_once(':') {
                    let key = key.trim().to_lowercase();
                    let value = value.trim().to_string();
                    last_header_key = Some(key.clone());

                    match headers.get_mut(&key) {
                        Some(existing) => {
                            existing.push(' ');
                            existing.push_str(&value);
                        }
                        None => {
                            headers.insert(key, value);
                        }
                    }
                }
            } else {
                body.push_str(line);
                body.push('\n');
            }
        }

        let sender = headers
            .get("return-path")
            .map(|v| v.trim_matches(['<', '>', ' ']).to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| headers.get("from").map(|v| address_from_header(v)))
            .unwrap_or_default();

        let authentication = headers
            .get("authentication-results")
            .map(|v| AuthenticationResults::parse(v))
            .unwrap_or_default();

        Self {
            id: headers
                .get("message-id")
                .map(|v| v.trim_matches(['<', '>', ' ']).to_string())
                .unwrap_or_default(),
            subject: headers.get("subject").cloned().unwrap_or_default(),
            sender,
            body,
            raw_content: raw.to_string(),
            headers,
            authentication,
            ..Default::default()
        }
        .normalized()
    }
}

impl AuthenticationResults {
    /// Pull `spf=`, `dkim=` and `dmarc=` outcomes from an
    /// Authentication-Results header value.
    pub fn parse(header: &str) -> Self {
        let outcome = |method: &str| {
            let needle = format!("{method}=");
            header
                .split(|c: char| c == ';' || c.is_whitespace())
                .find_map(|token| token.trim().strip_prefix(needle.as_str()))
                .map(|v| v.to_lowercase())
        };

        Self {
            spf: outcome("spf"),
            dkim: outcome("dkim"),
            dmarc: outcome("dmarc"),
        }
    }
}

/// `Name <user@example.com>` or a bare address
fn address_from_header(value: &str) -> String {
    match (value.rfind('<'), value.rfind('>')) {
        (Some(start), Some(end)) if start < end => value[start + 1..end].to_string(),
        _ => value.trim().to_string(),
    }
}

/// Extract the domain part of an address, tolerating angle brackets.
pub fn extract_domain(address: &str) -> Option<String> {
    let at_pos = address.rfind('@')?;
    let domain = address[at_pos + 1..].trim_end_matches('>').trim();
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_lowercase())
    }
}
