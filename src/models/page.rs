use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    Cover,
    Content,
    Summary,
}

impl PageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::Cover => "cover",
            PageType::Content => "content",
            PageType::Summary => "summary",
        }
    }

    /// Maps an outline tag such as `封面` to a page type.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "封面" | "cover" | "Cover" => Some(PageType::Cover),
            "内容" | "content" | "Content" => Some(PageType::Content),
            "总结" | "summary" | "Summary" => Some(PageType::Summary),
            _ => None,
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub index: usize,
    #[serde(rename = "type")]
    pub page_type: PageType,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineResult {
    pub success: bool,
    pub outline: String,
    pub pages: Vec<Page>,
    pub has_images: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutlineResult {
    pub fn success(outline: String, pages: Vec<Page>, has_images: bool) -> Self {
        OutlineResult {
            success: true,
            outline,
            pages,
            has_images,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        OutlineResult {
            success: false,
            outline: String::new(),
            pages: Vec::new(),
            has_images: false,
            error: Some(error.into()),
        }
    }
}
