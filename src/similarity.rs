use std::collections::HashSet;

/// A ranked candidate from a similarity query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimilarityHit {
    pub path: String,
    pub score: usize,
}

/// Normalized tag set of a cached prompt: comma-split, trimmed, lowercased.
pub fn tag_set(prompt: &str) -> HashSet<String> {
    prompt
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

/// Ranks candidates by shared-tag count against the source prompt.
///
/// The source itself and zero-overlap candidates are excluded. The sort is
/// stable, so equal scores keep the candidate input order.
pub fn rank_similar<'a>(
    source_path: &str,
    source_prompt: &str,
    candidates: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Vec<SimilarityHit> {
    let source_tags = tag_set(source_prompt);
    if source_tags.is_empty() {
        return Vec::new();
    }

    let mut hits: Vec<SimilarityHit> = candidates
        .into_iter()
        .filter(|(path, _)| *path != source_path)
        .filter_map(|(path, prompt)| {
            let score = tag_set(prompt).intersection(&source_tags).count();
            if score > 0 {
                Some(SimilarityHit {
                    path: path.to_string(),
                    score,
                })
            } else {
                None
            }
        })
        .collect();

    hits.sort_by(|a, b| b.score.cmp(&a.score));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_set_normalizes_and_drops_empties() {
        let tags = tag_set(" 1girl, Red Hair ,, smile ");
        assert_eq!(tags.len(), 3);
        assert!(tags.contains("1girl"));
        assert!(tags.contains("red hair"));
        assert!(tags.contains("smile"));
    }

    #[test]
    fn test_shared_tags_score_intersection_size() {
        let hits = rank_similar(
            "a.png",
            "1girl, red hair, smile",
            vec![
                ("b.png", "1girl, red hair, outdoors"),
                ("c.png", "landscape, mountains"),
            ],
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "b.png");
        assert_eq!(hits[0].score, 2);
    }

    #[test]
    fn test_source_image_is_excluded() {
        let hits = rank_similar(
            "a.png",
            "1girl, smile",
            vec![("a.png", "1girl, smile"), ("b.png", "1girl")],
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "b.png");
    }

    #[test]
    fn test_ranking_is_descending_with_stable_ties() {
        let hits = rank_similar(
            "src.png",
            "a, b, c",
            vec![
                ("one.png", "a"),
                ("two.png", "a, b, c"),
                ("three.png", "a, x"),
                ("four.png", "b, c"),
            ],
        );
        let ordered: Vec<&str> = hits.iter().map(|hit| hit.path.as_str()).collect();
        assert_eq!(ordered, vec!["two.png", "four.png", "one.png", "three.png"]);
    }

    #[test]
    fn test_empty_source_prompt_yields_no_hits() {
        let hits = rank_similar("a.png", "   ", vec![("b.png", "anything")]);
        assert!(hits.is_empty());
    }
}
