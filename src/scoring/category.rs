use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Highest possible final score; the category maxima add up to this.
pub const MAX_TOTAL: u32 = 100;

/// One of the five fixed rubric criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Content,
    Structure,
    Language,
    Creativity,
    Mechanics,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Content,
        Category::Structure,
        Category::Language,
        Category::Creativity,
        Category::Mechanics,
    ];

    pub fn max(self) -> u32 {
        match self {
            Category::Content | Category::Structure => 25,
            Category::Language | Category::Creativity => 20,
            Category::Mechanics => 10,
        }
    }

    /// Short key used in storage and API payloads.
    pub fn key(self) -> &'static str {
        match self {
            Category::Content => "content",
            Category::Structure => "structure",
            Category::Language => "language",
            Category::Creativity => "creativity",
            Category::Mechanics => "mechanics",
        }
    }

    /// Key the model is asked to use inside the JSON score block.
    pub fn block_key(self) -> &'static str {
        match self {
            Category::Content => "content_and_ideas",
            Category::Structure => "structure_and_organization",
            Category::Language => "language_use",
            Category::Creativity => "creativity_and_originality",
            Category::Mechanics => "mechanics",
        }
    }

    /// Heading text as it appears in feedback.
    pub fn title(self) -> &'static str {
        match self {
            Category::Content => "Content and Ideas",
            Category::Structure => "Structure and Organization",
            Category::Language => "Language Use",
            Category::Creativity => "Creativity and Originality",
            Category::Mechanics => "Mechanics",
        }
    }

    /// Case-insensitive heading matcher, tolerant of spacing and the
    /// Organization/Organisation spelling split.
    pub fn title_pattern(self) -> &'static str {
        match self {
            Category::Content => r"Content\s+and\s+Ideas",
            Category::Structure => r"Structure\s+and\s+Organi[sz]ation",
            Category::Language => r"Language\s+Use",
            Category::Creativity => r"Creativity\s+and\s+Originality",
            Category::Mechanics => r"Mechanics",
        }
    }

    /// Name inside the `EXTRACT_<NAME>_START` / `_END` sentinels.
    pub fn marker(self) -> &'static str {
        match self {
            Category::Content => "CONTENT_IDEAS",
            Category::Structure => "STRUCTURE_ORG",
            Category::Language => "LANGUAGE_USE",
            Category::Creativity => "CREATIVITY_ORIG",
            Category::Mechanics => "MECHANICS",
        }
    }

    fn index(self) -> usize {
        match self {
            Category::Content => 0,
            Category::Structure => 1,
            Category::Language => 2,
            Category::Creativity => 3,
            Category::Mechanics => 4,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{category} score {value} is outside 0..={max}", max = Category::max(*category))]
pub struct ScoreOutOfRange {
    pub category: Category,
    pub value: i64,
}

/// Raw per-category values as recovered from text or storage. Values are
/// unvalidated and any category may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialScores {
    values: BTreeMap<Category, i64>,
}

impl PartialScores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, category: Category, value: i64) {
        self.values.insert(category, value);
    }

    pub fn with(mut self, category: Category, value: i64) -> Self {
        self.set(category, value);
        self
    }

    pub fn get(&self, category: Category) -> Option<i64> {
        self.values.get(&category).copied()
    }

    pub fn missing(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|c| !self.values.contains_key(c))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.values.len() == Category::ALL.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fills categories absent here from `other`, keeping existing values.
    pub fn fill_from(&mut self, other: &PartialScores) {
        for (category, value) in &other.values {
            self.values.entry(*category).or_insert(*value);
        }
    }
}

/// A complete, validated set of five category scores. The total is always
/// derived from the five values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ScoreSetRepr", try_from = "ScoreSetRepr")]
pub struct CategoryScoreSet {
    scores: [u32; 5],
}

impl CategoryScoreSet {
    pub fn zero() -> Self {
        Self { scores: [0; 5] }
    }

    pub fn new(
        content: u32,
        structure: u32,
        language: u32,
        creativity: u32,
        mechanics: u32,
    ) -> Result<Self, ScoreOutOfRange> {
        let mut set = Self::zero();
        for (category, value) in Category::ALL
            .into_iter()
            .zip([content, structure, language, creativity, mechanics])
        {
            if value > category.max() {
                return Err(ScoreOutOfRange {
                    category,
                    value: i64::from(value),
                });
            }
            set.scores[category.index()] = value;
        }
        Ok(set)
    }

    /// Builds a set from raw values, substituting 0 for absent categories.
    pub fn try_from_partial(partial: &PartialScores) -> Result<Self, ScoreOutOfRange> {
        let mut set = Self::zero();
        for category in Category::ALL {
            let value = partial.get(category).unwrap_or(0);
            if value < 0 || value > i64::from(category.max()) {
                return Err(ScoreOutOfRange { category, value });
            }
            set.scores[category.index()] = value as u32;
        }
        Ok(set)
    }

    pub fn get(&self, category: Category) -> u32 {
        self.scores[category.index()]
    }

    pub fn total(&self) -> u32 {
        self.scores.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, u32)> + '_ {
        Category::ALL.into_iter().map(|c| (c, self.get(c)))
    }

    pub fn to_partial(&self) -> PartialScores {
        let mut partial = PartialScores::new();
        for (category, value) in self.iter() {
            partial.set(category, i64::from(value));
        }
        partial
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScoreSetRepr {
    content: u32,
    structure: u32,
    language: u32,
    creativity: u32,
    mechanics: u32,
    // Written for readers of the stored JSON; ignored when reading back.
    #[serde(default)]
    final_score: u32,
}

impl From<CategoryScoreSet> for ScoreSetRepr {
    fn from(set: CategoryScoreSet) -> Self {
        Self {
            content: set.get(Category::Content),
            structure: set.get(Category::Structure),
            language: set.get(Category::Language),
            creativity: set.get(Category::Creativity),
            mechanics: set.get(Category::Mechanics),
            final_score: set.total(),
        }
    }
}

impl TryFrom<ScoreSetRepr> for CategoryScoreSet {
    type Error = ScoreOutOfRange;

    fn try_from(repr: ScoreSetRepr) -> Result<Self, Self::Error> {
        CategoryScoreSet::new(
            repr.content,
            repr.structure,
            repr.language,
            repr.creativity,
            repr.mechanics,
        )
    }
}
