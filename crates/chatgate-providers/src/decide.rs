//! Search-decision engine.
//!
//! `should_search` classifies a query as worth a web search via an ordered
//! rule cascade. Source order IS the precedence: the first rule returning a
//! verdict wins and later stages are unreachable. Rules 4-7 have overlapping
//! triggers on purpose; do not reorder or merge them.

use std::sync::OnceLock;

use chrono::Datelike;
use regex::Regex;

/// Years at or after `current_year - RECENCY_WINDOW_YEARS` count as recent.
const RECENCY_WINDOW_YEARS: i32 = 3;

/// Queries longer than this are treated as complex enough to search.
const LONG_QUERY_WORDS: usize = 15;

fn time_relevant_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(latest|news|current|recent|today)\b").expect("valid regex")
    })
}

fn internal_knowledge_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            \b(who\ are\ you|your\ name|what\ can\ you\ do|about\ yourself)\b
            |\b(write|compose|create|draft)\b.*\b(poem|story|essay|song|letter|haiku|script|joke)\b
            |\btranslat(e|ion)\b
            |\bsummar(y|ize|ise|ies)\b
            |\b(what\ do\ you\ think|your\ opinion|do\ you\ (like|prefer|think)|your\ favorite)\b",
        )
        .expect("valid regex")
    })
}

fn common_knowledge_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            \b(capital\ of|history\ of|definition\ of|meaning\ of
              |who\ (was|invented|discovered)
              |theory\ of|speed\ of\ light|boiling\ point|periodic\ table|square\ root)\b
            |\bwhat\ (is|are)\ (a|an|the)\ (definition|meaning|capital|theory)\b",
        )
        .expect("valid regex")
    })
}

fn factual_question_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            ^(what|who|when|where|why|how)\s+(is|are|was|were|do|does|did|will|has|have|can)\b
            |\b(tell\ me\ about|find|search|news|statistics|stats)\b",
        )
        .expect("valid regex")
    })
}

fn time_sensitive_domain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            \b(election|president|prime\ minister|senate|congress|government|policy
              |stocks?|markets?|prices?|crypto|bitcoin|inflation|economy|earnings|ipo
              |games?|scores?|match|season|playoffs|championship|tournament|league
              |tech|technology|release[ds]?|launch(ed)?|update|version
              |company|startup|ceo|acquisition|merger)\b",
        )
        .expect("valid regex")
    })
}

fn year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(1[89]\d{2}|20\d{2})\b").expect("valid regex"))
}

fn historical_domain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            \b(history|historical|historian|ancient|medieval|renaissance
              |century|centuries|empire|dynasty|civilization|archaeology|world\ war)\b",
        )
        .expect("valid regex")
    })
}

/// Facts precomputed once per query; every rule reads from here.
#[derive(Debug)]
pub struct QueryFacts {
    words: Vec<String>,
    lower: String,
    word_count: usize,
    time_relevant: bool,
    years: Vec<i32>,
    current_year: i32,
}

impl QueryFacts {
    pub fn new(query: &str) -> Self {
        Self::with_current_year(query, chrono::Utc::now().year())
    }

    fn with_current_year(query: &str, current_year: i32) -> Self {
        let words: Vec<String> = query.split_whitespace().map(str::to_string).collect();
        let lower = query.to_lowercase();
        let time_relevant = time_relevant_re().is_match(&lower);
        let years = year_re()
            .find_iter(&lower)
            .filter_map(|m| m.as_str().parse::<i32>().ok())
            .collect();
        Self {
            word_count: words.len(),
            words,
            lower,
            time_relevant,
            years,
            current_year,
        }
    }

    fn explicit_now(&self) -> bool {
        self.time_relevant || self.lower.contains("this year")
    }

    fn has_entity(&self) -> bool {
        // A capitalized word past the sentence start reads as a proper noun.
        self.words.iter().skip(1).any(|w| {
            let mut chars = w.chars();
            chars.next().is_some_and(|c| c.is_ascii_uppercase())
                && chars.next().is_some_and(|c| c.is_ascii_lowercase())
        })
    }
}

type Rule = (&'static str, fn(&QueryFacts) -> Option<bool>);

// Stage 1: too short to be a real information need, unless it carries a
// time-relevance override term.
fn short_query(f: &QueryFacts) -> Option<bool> {
    if f.word_count < 4 && !f.time_relevant {
        return Some(false);
    }
    None
}

// Stage 2: the model can answer from internal knowledge (self-referential,
// creative writing, translation, summarization, opinion).
fn internal_knowledge(f: &QueryFacts) -> Option<bool> {
    if internal_knowledge_re().is_match(&f.lower) && !f.time_relevant {
        return Some(false);
    }
    None
}

// Stage 3: stable common knowledge (history, definitions, capitals,
// scientific theory), unless the query pins it to the present.
fn common_knowledge(f: &QueryFacts) -> Option<bool> {
    if common_knowledge_re().is_match(&f.lower) && !f.explicit_now() {
        return Some(false);
    }
    None
}

// Stage 4: factual-question phrasing. Time-relevant wording searches;
// otherwise only a time-sensitive domain term (politics, sports, tech,
// business) justifies it.
fn factual_question(f: &QueryFacts) -> Option<bool> {
    if factual_question_re().is_match(&f.lower) {
        return Some(f.time_relevant || time_sensitive_domain_re().is_match(&f.lower));
    }
    None
}

// Stage 5: a proper-noun entity searches only with time-relevant phrasing.
fn proper_noun_entity(f: &QueryFacts) -> Option<bool> {
    if f.has_entity() {
        return Some(f.time_relevant);
    }
    None
}

// Stage 6: explicit years search when any falls inside the recency window.
fn recent_year(f: &QueryFacts) -> Option<bool> {
    if f.years.is_empty() {
        return None;
    }
    let cutoff = f.current_year - RECENCY_WINDOW_YEARS;
    Some(f.years.iter().any(|y| *y >= cutoff))
}

// Stage 7: long/complex queries search, unless they live in a historical
// domain.
fn long_query(f: &QueryFacts) -> Option<bool> {
    if f.word_count > LONG_QUERY_WORDS {
        return Some(!historical_domain_re().is_match(&f.lower));
    }
    None
}

static RULES: &[Rule] = &[
    ("short_query", short_query),
    ("internal_knowledge", internal_knowledge),
    ("common_knowledge", common_knowledge),
    ("factual_question", factual_question),
    ("proper_noun_entity", proper_noun_entity),
    ("recent_year", recent_year),
    ("long_query", long_query),
];

/// Pure heuristic classifier: should this query trigger a web search?
pub fn should_search(query: &str) -> bool {
    verdict_for(&QueryFacts::new(query))
}

fn verdict_for(facts: &QueryFacts) -> bool {
    for (_name, rule) in RULES {
        if let Some(v) = rule(facts) {
            return v;
        }
    }
    false
}
