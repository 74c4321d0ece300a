use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use anyhow::anyhow;

/// One structured piece of a tutor answer. The upstream model speaks
/// markdown; clients render typed blocks.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TutorBlock {
    Heading { text: String },
    Paragraph { text: String },
    Code { language: String, text: String },
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("tutor quota exhausted")]
    Quota,
    #[error("tutor misconfigured")]
    Config,
    #[error("tutor timed out")]
    Timeout,
    #[error("tutor request failed")]
    Upstream(#[source] anyhow::Error),
}

/// The tutoring backend as the room core sees it: prompt + subject in,
/// content blocks out. The production impl talks HTTP; tests script one.
pub trait TutorOracle: Send + Sync {
    fn ask(
        &self,
        prompt: &str,
        subject: &str,
        room_id: Uuid,
    ) -> BoxFuture<'static, Result<Vec<TutorBlock>, OracleError>>;
}

#[derive(Clone)]
pub struct HttpOracle {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpOracle {
    pub fn from_env() -> anyhow::Result<Self> {
        let timeout_ms = dotenv::var("ORACLE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30_000);

        Ok(Self {
            http: reqwest::ClientBuilder::new()
                .timeout(Duration::from_millis(timeout_ms))
                .build()?,
            url: dotenv::var("ORACLE_URL")?,
            api_key: dotenv::var("ORACLE_API_KEY")?,
        })
    }
}

impl TutorOracle for HttpOracle {
    fn ask(
        &self,
        prompt: &str,
        subject: &str,
        room_id: Uuid,
    ) -> BoxFuture<'static, Result<Vec<TutorBlock>, OracleError>> {
        let this = self.clone();
        let body = json!({
            "prompt": prompt,
            "subject": subject,
            "roomId": room_id,
        });

        async move {
            let response = this
                .http
                .post(&this.url)
                .bearer_auth(&this.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|err| {
                    if err.is_timeout() {
                        OracleError::Timeout
                    } else {
                        OracleError::Upstream(err.into())
                    }
                })?;

            match response.status() {
                status if status.is_success() => {}
                StatusCode::TOO_MANY_REQUESTS | StatusCode::PAYMENT_REQUIRED => {
                    return Err(OracleError::Quota);
                }
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(OracleError::Config);
                }
                status => {
                    return Err(OracleError::Upstream(anyhow!("tutor returned {status}")));
                }
            }

            let body: Value = response
                .json()
                .await
                .map_err(|err| OracleError::Upstream(err.into()))?;
            let answer = body
                .get("answer")
                .and_then(Value::as_str)
                .ok_or_else(|| OracleError::Upstream(anyhow!("tutor answer missing in {body}")))?;

            Ok(blocks_from_markdown(answer))
        }
        .boxed()
    }
}

/// Splits a markdown answer into headings, paragraphs and fenced code.
/// List items come through as paragraphs; inline markup is flattened to
/// its text.
pub fn blocks_from_markdown(text: &str) -> Vec<TutorBlock> {
    use pulldown_cmark::{CodeBlockKind, Event, Parser, Tag, TagEnd};

    let mut blocks = Vec::new();
    let mut buf = String::new();
    let mut code_lang: Option<String> = None;

    for event in Parser::new(text) {
        match event {
            Event::Start(Tag::Heading { .. }) => buf.clear(),
            Event::Start(Tag::CodeBlock(kind)) => {
                code_lang = Some(match kind {
                    CodeBlockKind::Fenced(lang) => lang.to_string(),
                    CodeBlockKind::Indented => String::new(),
                });
                buf.clear();
            }
            Event::End(TagEnd::Heading(_)) => {
                blocks.push(TutorBlock::Heading { text: buf.trim().to_owned() });
                buf.clear();
            }
            Event::End(TagEnd::CodeBlock) => {
                blocks.push(TutorBlock::Code {
                    language: code_lang.take().unwrap_or_default(),
                    text: buf.trim_end().to_owned(),
                });
                buf.clear();
            }
            Event::End(TagEnd::Paragraph) | Event::End(TagEnd::Item) => {
                let text = buf.trim();
                if !text.is_empty() {
                    blocks.push(TutorBlock::Paragraph { text: text.to_owned() });
                }
                buf.clear();
            }
            Event::Text(t) | Event::Code(t) => buf.push_str(&t),
            Event::SoftBreak | Event::HardBreak => buf.push(' '),
            _ => {}
        }
    }

    if blocks.is_empty() {
        let text = text.trim();
        if !text.is_empty() {
            blocks.push(TutorBlock::Paragraph { text: text.to_owned() });
        }
    }

    blocks
}
