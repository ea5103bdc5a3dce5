use chrono::{DateTime, Utc};
use serde::Serialize;

/// One structured result of a vision-analysis pass over a drawing.
///
/// Produced only by the image-turn path and appended to the session's
/// analysis list; never edited afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRecord {
    pub colors: Vec<String>,
    pub emotion: String,
    pub content: String,
    pub context: String,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    /// Parses the free-text vision reply by scanning each line for the four
    /// Korean field markers (색상/감정/내용/문맥) and splitting the matched
    /// line on its first colon. Matching is order-independent across lines;
    /// colors are comma-split and trimmed. A missing marker leaves that
    /// field at its default — lenient parsing is part of the contract.
    pub fn parse(text: &str) -> Self {
        let mut colors = Vec::new();
        let mut emotion = String::new();
        let mut content = String::new();
        let mut context = String::new();

        for line in text.lines() {
            let Some((marker, value)) = line.split_once(':') else {
                continue;
            };
            if marker.contains("색상") {
                colors = value
                    .split(',')
                    .map(|color| color.trim().to_string())
                    .filter(|color| !color.is_empty())
                    .collect();
            } else if marker.contains("감정") {
                emotion = value.trim().to_string();
            } else if marker.contains("내용") {
                content = value.trim().to_string();
            } else if marker.contains("문맥") {
                context = value.trim().to_string();
            }
        }

        Self {
            colors,
            emotion,
            content,
            context,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_four_fields() {
        let record =
            AnalysisRecord::parse("색상: 빨강, 파랑\n감정: 기쁨\n내용: 나무\n문맥: 숲 이야기");
        assert_eq!(record.colors, vec!["빨강", "파랑"]);
        assert_eq!(record.emotion, "기쁨");
        assert_eq!(record.content, "나무");
        assert_eq!(record.context, "숲 이야기");
    }

    #[test]
    fn parsing_is_order_independent() {
        let record = AnalysisRecord::parse("문맥: 바다 여행\n색상: 초록\n감정: 설렘");
        assert_eq!(record.colors, vec!["초록"]);
        assert_eq!(record.emotion, "설렘");
        assert_eq!(record.context, "바다 여행");
        assert!(record.content.is_empty());
    }

    #[test]
    fn tolerates_numbered_prefixes() {
        let record = AnalysisRecord::parse(
            "1. 사용된 주요 색상: 노랑, 주황\n2. 그림에서 느껴지는 감정: 행복",
        );
        assert_eq!(record.colors, vec!["노랑", "주황"]);
        assert_eq!(record.emotion, "행복");
    }

    #[test]
    fn unrecognized_markers_leave_fields_empty() {
        let record = AnalysisRecord::parse("주제: 우주\n분위기: 신남");
        assert!(record.colors.is_empty());
        assert!(record.emotion.is_empty());
        assert!(record.content.is_empty());
        assert!(record.context.is_empty());
    }

    #[test]
    fn marker_line_without_colon_is_skipped() {
        let record = AnalysisRecord::parse("색상이 다양합니다\n감정: 평온");
        assert!(record.colors.is_empty());
        assert_eq!(record.emotion, "평온");
    }
}
