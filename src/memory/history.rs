//! 对话历史：Turn 序列与不透明 blob 的序列化
//!
//! 调用方只持有 blob 字符串（JSON 信封 + 版本号），每次请求开始时读一次、结束时写一次。
//! blob 损坏或来自其它系统时退化为空历史并记录 warn，绝不阻塞当前请求。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::Message;

const BLOB_FORMAT: &str = "easel.history";
const BLOB_VERSION: u32 = 1;

/// Turn 的发言方
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Agent,
}

/// Turn 内容：纯文本，或一次成功出图的结构化记录
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnContent {
    Text {
        text: String,
    },
    Artifact {
        title: String,
        artifact_reference: String,
        /// 产出该图的分类标签（如 technical / mermaid）
        label: String,
    },
}

impl TurnContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// 渲染为提示词中的一行内容
    pub fn render(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Artifact {
                title,
                artifact_reference,
                label,
            } => format!("[{label} artifact \"{title}\" at {artifact_reference}]"),
        }
    }
}

/// 一次发言；追加后不可变
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub index: usize,
    pub role: TurnRole,
    pub content: TurnContent,
    pub timestamp: DateTime<Utc>,
}

/// 反序列化失败原因（仅用于日志，不会返回给调用方）
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("malformed history blob: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("foreign history blob (format {format:?}, version {version})")]
    Foreign { format: String, version: u32 },

    #[error("turn {position} carries index {index}")]
    OutOfOrder { position: usize, index: usize },
}

#[derive(Serialize, Deserialize)]
struct HistoryBlob {
    format: String,
    version: u32,
    turns: Vec<Turn>,
}

/// 有序的 Turn 序列，只允许追加
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// 追加一个 Turn，index 为当前长度，时间戳为当前 UTC 时间
    pub fn append(&mut self, role: TurnRole, content: TurnContent) -> &Turn {
        let index = self.turns.len();
        self.turns.push(Turn {
            index,
            role,
            content,
            timestamp: Utc::now(),
        });
        &self.turns[index]
    }

    /// 最近一次成功产出的图（用于增量修改，如「加一个缓存层」）
    pub fn last_artifact(&self) -> Option<&TurnContent> {
        self.turns
            .iter()
            .rev()
            .map(|t| &t.content)
            .find(|c| matches!(c, TurnContent::Artifact { .. }))
    }

    /// 渲染为 `role: content` 文本，供分类器与兜底 Agent 使用；空历史返回空字符串
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|t| {
                let role = match t.role {
                    TurnRole::User => "user",
                    TurnRole::Agent => "agent",
                };
                format!("{}: {}", role, t.content.render())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 转为 LLM 消息序列（user -> User，agent -> Assistant）
    pub fn to_messages(&self) -> Vec<Message> {
        self.turns
            .iter()
            .map(|t| match t.role {
                TurnRole::User => Message::user(t.content.render()),
                TurnRole::Agent => Message::assistant(t.content.render()),
            })
            .collect()
    }

    /// 序列化为不透明 blob
    pub fn serialize(&self) -> String {
        let blob = HistoryBlob {
            format: BLOB_FORMAT.to_string(),
            version: BLOB_VERSION,
            turns: self.turns.clone(),
        };
        // 结构体只含字符串、整数与时间戳，序列化不会失败
        serde_json::to_string(&blob).unwrap_or_default()
    }

    /// 严格反序列化：格式、版本、index 连续性都必须正确
    pub fn try_deserialize(blob: &str) -> Result<Self, HistoryError> {
        let parsed: HistoryBlob = serde_json::from_str(blob)?;
        if parsed.format != BLOB_FORMAT || parsed.version != BLOB_VERSION {
            return Err(HistoryError::Foreign {
                format: parsed.format,
                version: parsed.version,
            });
        }
        if let Some((position, turn)) = parsed
            .turns
            .iter()
            .enumerate()
            .find(|(i, t)| t.index != *i)
        {
            return Err(HistoryError::OutOfOrder {
                position,
                index: turn.index,
            });
        }
        Ok(Self {
            turns: parsed.turns,
        })
    }

    /// 宽松反序列化：空 blob 为空历史；损坏时记录 warn 并从空历史开始
    pub fn deserialize(blob: &str) -> Self {
        if blob.trim().is_empty() {
            return Self::new();
        }
        match Self::try_deserialize(blob) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable history blob, starting fresh");
                Self::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> History {
        let mut h = History::new();
        h.append(TurnRole::User, TurnContent::text("Draw an AWS web app"));
        h.append(
            TurnRole::Agent,
            TurnContent::Artifact {
                title: "AWS Web App".to_string(),
                artifact_reference: "gs://bucket/abc.png".to_string(),
                label: "technical".to_string(),
            },
        );
        h
    }

    #[test]
    fn test_round_trip() {
        let h = sample();
        let blob = h.serialize();
        assert_eq!(History::deserialize(&blob), h);
    }

    #[test]
    fn test_empty_round_trip() {
        let h = History::new();
        assert_eq!(History::deserialize(&h.serialize()), h);
        assert!(History::deserialize("   ").is_empty());
    }

    #[test]
    fn test_corrupt_blob_degrades_to_empty() {
        assert!(History::deserialize("{not json").is_empty());
        assert!(History::deserialize(r#"[{"role":"user","content":"hi"}]"#).is_empty());
        assert!(matches!(
            History::try_deserialize(r#"{"format":"other","version":1,"turns":[]}"#),
            Err(HistoryError::Foreign { .. })
        ));
    }

    #[test]
    fn test_out_of_order_indices_rejected() {
        let mut blob: serde_json::Value = serde_json::from_str(&sample().serialize()).unwrap();
        blob["turns"][1]["index"] = serde_json::json!(7);
        let err = History::try_deserialize(&blob.to_string()).unwrap_err();
        assert!(matches!(err, HistoryError::OutOfOrder { position: 1, index: 7 }));
    }

    #[test]
    fn test_render_and_messages() {
        let h = sample();
        let text = h.render();
        assert!(text.starts_with("user: Draw an AWS web app"));
        assert!(text.contains("gs://bucket/abc.png"));
        let msgs = h.to_messages();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].role, crate::memory::Role::Assistant);
        assert!(h.last_artifact().is_some());
    }
}
