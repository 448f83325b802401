//! Queries describing which control (or top-level window) to look for.
//!
//! A [`ControlDescriptor`] is stateless and reusable. Scoring a snapshot
//! against it is a pure function, so layouts can be tested without a screen.

use crate::utils::fold_text;
use crate::{ControlSnapshot, Rect};
use regex::Regex;

/// How a class name is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassPattern {
    Exact(String),
    Prefix(String),
}

impl ClassPattern {
    pub fn matches(&self, class_name: &str) -> bool {
        match self {
            ClassPattern::Exact(name) => class_name.eq_ignore_ascii_case(name),
            ClassPattern::Prefix(prefix) => class_name
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TextMatch {
    /// Trimmed, case-insensitive equality.
    Exact(String),
    /// Accent- and case-insensitive substring.
    Contains(String),
    Pattern(Regex),
    NonEmpty,
}

impl TextMatch {
    pub fn matches(&self, text: &str) -> bool {
        let text = text.trim();
        match self {
            TextMatch::Exact(expected) => fold_text(text) == fold_text(expected.trim()),
            TextMatch::Contains(needle) => fold_text(text).contains(&fold_text(needle)),
            TextMatch::Pattern(regex) => regex.is_match(text),
            TextMatch::NonEmpty => !text.is_empty(),
        }
    }
}

/// Where a candidate must sit relative to the search root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Top edge between the root's top and `height` pixels below it.
    TopBand { height: i32 },
}

impl Region {
    pub fn admits(&self, root: &Rect, candidate: &Rect) -> bool {
        match self {
            Region::TopBand { height } => {
                candidate.top >= root.top && candidate.top <= root.top + height
            }
        }
    }
}

/// A reference rectangle the candidate is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// Candidate's right edge must not pass the reference's left edge.
    LeftOf(Rect),
    /// Candidate's left edge must be at least `reference.right - slack`.
    RightOf { reference: Rect, slack: i32 },
}

impl Anchor {
    fn reference(&self) -> &Rect {
        match self {
            Anchor::LeftOf(r) => r,
            Anchor::RightOf { reference, .. } => reference,
        }
    }

    fn admits(&self, candidate: &Rect) -> bool {
        match self {
            Anchor::LeftOf(reference) => candidate.right <= reference.left,
            Anchor::RightOf { reference, slack } => candidate.left >= reference.right - slack,
        }
    }

    fn horizontal_gap(&self, candidate: &Rect) -> i64 {
        let gap = match self {
            Anchor::LeftOf(reference) => reference.left - candidate.right,
            Anchor::RightOf { reference, .. } => candidate.left - reference.right,
        };
        (gap as i64).abs()
    }

    fn vertical_gap(&self, candidate: &Rect) -> i64 {
        ((candidate.top - self.reference().top) as i64).abs()
    }
}

/// Tie-breaker used when no anchor gives a distance to minimise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preference {
    #[default]
    First,
    Widest,
    LargestArea,
}

/// Penalties added to the distance score for irregular candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Penalties {
    /// Multiplier on `|width - height|`.
    pub squareness: i64,
    /// Added when the candidate carries caption text.
    pub has_text: i64,
    /// Added when the candidate is larger than `small_side` in either direction.
    pub not_small: i64,
    pub small_side: i32,
}

#[derive(Debug, Clone)]
pub struct ControlDescriptor {
    pub classes: Vec<ClassPattern>,
    /// Generic containers that satisfy the filter but are replaced by a
    /// more specific descendant when one exists.
    pub wrappers: Vec<ClassPattern>,
    pub text: Option<TextMatch>,
    pub region: Option<Region>,
    pub anchor: Option<Anchor>,
    pub min_size: Option<(i32, i32)>,
    pub max_size: Option<(i32, i32)>,
    pub require_enabled: bool,
    /// `k` in `horizontal_gap + k * vertical_gap + penalty`.
    pub vertical_weight: i64,
    pub penalties: Penalties,
    pub preference: Preference,
}

impl Default for ControlDescriptor {
    fn default() -> Self {
        Self {
            classes: Vec::new(),
            wrappers: Vec::new(),
            text: None,
            region: None,
            anchor: None,
            min_size: None,
            max_size: None,
            require_enabled: false,
            vertical_weight: 1,
            penalties: Penalties::default(),
            preference: Preference::First,
        }
    }
}

impl ControlDescriptor {
    pub fn of_classes<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            classes: classes
                .into_iter()
                .map(|c| ClassPattern::Exact(c.into()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_wrapper(mut self, wrapper: ClassPattern) -> Self {
        self.wrappers.push(wrapper);
        self
    }

    pub fn with_text(mut self, text: TextMatch) -> Self {
        self.text = Some(text);
        self
    }

    pub fn in_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    pub fn anchored(mut self, anchor: Anchor, vertical_weight: i64) -> Self {
        self.anchor = Some(anchor);
        self.vertical_weight = vertical_weight;
        self
    }

    pub fn min_size(mut self, width: i32, height: i32) -> Self {
        self.min_size = Some((width, height));
        self
    }

    pub fn max_size(mut self, width: i32, height: i32) -> Self {
        self.max_size = Some((width, height));
        self
    }

    pub fn enabled_only(mut self) -> Self {
        self.require_enabled = true;
        self
    }

    pub fn with_penalties(mut self, penalties: Penalties) -> Self {
        self.penalties = penalties;
        self
    }

    pub fn prefer(mut self, preference: Preference) -> Self {
        self.preference = preference;
        self
    }

    pub fn is_wrapper(&self, class_name: &str) -> bool {
        !self.classes.iter().any(|p| p.matches(class_name))
            && self.wrappers.iter().any(|p| p.matches(class_name))
    }

    fn accepts_class(&self, class_name: &str) -> bool {
        self.classes.iter().any(|p| p.matches(class_name))
            || self.wrappers.iter().any(|p| p.matches(class_name))
    }

    /// Lower is better; `None` means the candidate is filtered out.
    pub fn score(&self, candidate: &ControlSnapshot, root: Option<&Rect>) -> Option<i64> {
        if !candidate.visible || (self.require_enabled && !candidate.enabled) {
            return None;
        }
        if !self.accepts_class(&candidate.class_name) {
            return None;
        }
        let rect = &candidate.rect;
        if let Some((w, h)) = self.min_size {
            if rect.width() < w || rect.height() < h {
                return None;
            }
        }
        if let Some((w, h)) = self.max_size {
            if rect.width() > w || rect.height() > h {
                return None;
            }
        }
        if let (Some(region), Some(root)) = (self.region, root) {
            if !region.admits(root, rect) {
                return None;
            }
        }
        if let Some(text) = &self.text {
            if !text.matches(&candidate.text) {
                return None;
            }
        }

        let mut score = match &self.anchor {
            Some(anchor) => {
                if !anchor.admits(rect) {
                    return None;
                }
                anchor.horizontal_gap(rect) + self.vertical_weight * anchor.vertical_gap(rect)
            }
            None => match self.preference {
                Preference::First => 0,
                Preference::Widest => -(rect.width() as i64),
                Preference::LargestArea => -rect.area(),
            },
        };
        score += self.size_penalty(candidate);
        Some(score)
    }

    fn size_penalty(&self, candidate: &ControlSnapshot) -> i64 {
        let p = &self.penalties;
        let rect = &candidate.rect;
        let mut penalty = p.squareness * ((rect.width() - rect.height()) as i64).abs();
        if p.has_text != 0 && !candidate.text.is_empty() {
            penalty += p.has_text;
        }
        if p.not_small != 0 && (rect.width() > p.small_side || rect.height() > p.small_side) {
            penalty += p.not_small;
        }
        penalty
    }

    /// Best candidate among `candidates`; ties keep enumeration order.
    pub fn best<'a>(
        &self,
        candidates: &'a [ControlSnapshot],
        root: Option<&Rect>,
    ) -> Option<&'a ControlSnapshot> {
        let mut best: Option<(i64, &ControlSnapshot)> = None;
        for candidate in candidates {
            if let Some(score) = self.score(candidate, root) {
                if best.map_or(true, |(current, _)| score < current) {
                    best = Some((score, candidate));
                }
            }
        }
        best.map(|(_, candidate)| candidate)
    }

    /// Every admitted candidate, best first.
    pub fn ranked<'a>(
        &self,
        candidates: &'a [ControlSnapshot],
        root: Option<&Rect>,
    ) -> Vec<(i64, &'a ControlSnapshot)> {
        let mut scored: Vec<(i64, &ControlSnapshot)> = candidates
            .iter()
            .filter_map(|c| self.score(c, root).map(|s| (s, c)))
            .collect();
        scored.sort_by_key(|(score, _)| *score);
        scored
    }
}

/// How a top-level window title is matched.
#[derive(Debug, Clone)]
pub enum TitleMatch {
    Exact(String),
    Contains(String),
    Pattern(Regex),
}

impl TitleMatch {
    pub fn matches(&self, title: &str) -> bool {
        match self {
            TitleMatch::Exact(expected) => title.trim() == expected,
            TitleMatch::Contains(needle) => fold_text(title).contains(&fold_text(needle)),
            TitleMatch::Pattern(regex) => regex.is_match(title),
        }
    }
}

/// Query over top-level windows.
#[derive(Debug, Clone, Default)]
pub struct WindowQuery {
    pub class_name: Option<String>,
    pub title: Option<TitleMatch>,
    /// Substring the concatenated static-text children must contain.
    pub static_text: Option<String>,
    pub visible_only: bool,
}

impl WindowQuery {
    pub fn titled(title: TitleMatch) -> Self {
        Self {
            title: Some(title),
            visible_only: true,
            ..Default::default()
        }
    }

    pub fn of_class(class_name: &str) -> Self {
        Self {
            class_name: Some(class_name.to_string()),
            visible_only: true,
            ..Default::default()
        }
    }

    pub fn with_static_text(mut self, phrase: &str) -> Self {
        self.static_text = Some(phrase.to_string());
        self
    }
}
