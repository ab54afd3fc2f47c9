//! Fixed vocabularies and patterns behind the block features.
//!
//! Kept in one place so the lists can be versioned and unit-tested together
//! with the weight table that consumes them.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

/// Bumped whenever a list below changes; part of the cache rubric fingerprint.
pub const LEXICON_VERSION: &str = "lexicon-v2";

/// Words naming a job, title, or function held by one person.
pub const ROLE_WORDS: &[&str] = &[
    "ceo", "cto", "cfo", "coo", "cio", "cmo", "vp", "svp", "evp", "founder", "cofounder",
    "president", "director", "manager", "officer", "chair", "chairman", "chairwoman",
    "chairperson", "professor", "lecturer", "researcher", "scientist", "engineer", "developer",
    "designer", "architect", "analyst", "consultant", "advisor", "adviser", "coordinator",
    "lead", "head", "partner", "associate", "attorney", "lawyer", "physician", "nurse",
    "surgeon", "editor", "author", "writer", "journalist", "reporter", "correspondent",
    "curator", "librarian", "teacher", "principal", "dean", "treasurer", "secretary",
    "trustee", "fellow", "intern", "specialist", "administrator", "assistant", "executive",
    "supervisor", "pastor", "minister", "accountant", "therapist", "counselor", "coach",
];

/// Words that introduce or describe collections rather than one entity.
pub const AGGREGATE_WORDS: &[&str] = &[
    "team", "staff", "members", "directory", "listing", "listings", "people", "employees",
    "faculty", "board", "leadership", "everyone", "departments", "browse", "results",
    "categories", "category", "menu", "navigation", "showing", "filter", "sort", "all",
    "our", "meet", "list", "more", "others", "contributors", "speakers", "authors",
];

/// Honorifics and post-nominals ignored when comparing names.
pub const NAME_TITLES: &[&str] = &[
    "dr", "mr", "mrs", "ms", "mx", "miss", "prof", "professor", "sir", "dame", "rev", "hon",
    "phd", "md", "jr", "sr", "ii", "iii", "iv", "esq", "mba", "rn", "dds",
];

/// Honorifics that open a personal name.
const PREFIX_TITLES: &[&str] = &[
    "dr", "mr", "mrs", "ms", "mx", "miss", "prof", "professor", "sir", "dame", "rev", "hon",
];

/// Longest run of capitalized words read as one name, honorific excluded.
const MAX_NAME_WORDS: usize = 3;

/// Words after a name searched for the role bound to it.
const ROLE_WINDOW_AFTER: usize = 8;

/// Capitalized words that are never part of a personal or product name heading.
const HEADING_STOPWORDS: &[&str] = &[
    "the", "a", "an", "of", "and", "or", "for", "to", "in", "on", "at", "by", "with", "about",
    "contact", "us", "home", "welcome", "news", "blog", "page", "read", "learn", "view",
];

lazy_static! {
    pub static ref ROLE_SET: HashSet<&'static str> = ROLE_WORDS.iter().copied().collect();
    pub static ref AGGREGATE_SET: HashSet<&'static str> = AGGREGATE_WORDS.iter().copied().collect();
    pub static ref TITLE_SET: HashSet<&'static str> = NAME_TITLES.iter().copied().collect();
    static ref HEADING_STOP_SET: HashSet<&'static str> = HEADING_STOPWORDS.iter().copied().collect();
    static ref PREFIX_TITLE_SET: HashSet<&'static str> = PREFIX_TITLES.iter().copied().collect();

    // A whole heading that names a group: "Our Team", "Staff Directory",
    // "Board of Directors", "All Products". Singular roles such as
    // "Meet the Founder" or "Jane Roe, Staff Engineer" do not match.
    pub static ref COLLECTIVE_HEADING: Regex = Regex::new(
        r"(?ix)
        ^(?:
            (?:(?:our|meet\s+(?:the|our)|the|all|browse|more|other)\s+)?
            (?:\w+\s+)?
            (?:team|teams|staff|people|faculty|leadership|board|members|employees|experts
              |speakers|authors|contributors|partners|volunteers|researchers|trustees
              |officers|founders|advisors|instructors|directory|directories|listings?
              |list|navigation|menu|site\s*map)
            (?:\s+(?:&|and)?\s*(?:team|staff|faculty|members|directory|list|listings?|leadership))?
            (?:\s+of\s+\w+)?
          | who\s+we\s+are
          | (?:all|related|more|browse)\s+\w+(?:\s+\w+)?
        )$"
    ).unwrap();

    // Honorific followed by one or two capitalized words: "Dr. Sarah Chen"
    pub static ref TITLED_NAME: Regex = Regex::new(
        r"\b(?:Dr|Mr|Mrs|Ms|Mx|Prof|Rev)\.?\s+\p{Lu}[\p{L}'\-]+(?:\s+\p{Lu}[\p{L}'\-]+)?"
    ).unwrap();

    pub static ref EMAIL: Regex = Regex::new(
        r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b"
    ).unwrap();

    pub static ref PHONE: Regex = Regex::new(
        r"(?:\+?\d{1,3}[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b"
    ).unwrap();

    pub static ref PROFILE_LINK: Regex = Regex::new(
        r"(?i)(?:mailto:|tel:|linkedin\.com/in/|twitter\.com/|x\.com/|github\.com/)"
    ).unwrap();

    pub static ref URL_TOKEN: Regex = Regex::new(r"(?i)\b(?:https?://|www\.)\S+").unwrap();
}

/// Lowercased alphanumeric tokens of a text.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.trim_matches('\'').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Whether a single heading token looks like part of a proper name.
pub fn is_name_token(token: &str) -> bool {
    let bare = token.trim_matches(|c: char| !c.is_alphanumeric());
    if bare.is_empty() {
        return false;
    }
    let lower = bare.to_lowercase();
    if TITLE_SET.contains(lower.as_str()) {
        return true;
    }
    if HEADING_STOP_SET.contains(lower.as_str())
        || AGGREGATE_SET.contains(lower.as_str())
        || ROLE_SET.contains(lower.as_str())
    {
        return false;
    }

    let mut chars = bare.chars();
    let first_upper = chars.next().is_some_and(|c| c.is_uppercase());
    first_upper && chars.all(|c| c.is_alphabetic() || c == '-' || c == '\'')
}

/// Whether a heading reads as a collection header.
pub fn is_collective_heading(heading: &str) -> bool {
    let trimmed = heading
        .trim()
        .trim_end_matches(|c: char| matches!(c, ':' | '.' | '!' | '?'))
        .trim();
    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    COLLECTIVE_HEADING.is_match(&collapsed)
}

/// Whether text contains an email, phone number, or profile link.
pub fn has_contact_signal(text: &str) -> bool {
    EMAIL.is_match(text) || PHONE.is_match(text) || PROFILE_LINK.is_match(text)
}

/// A name-like span found in running text.
#[derive(Debug)]
struct NameMention {
    start: usize,
    end: usize,
    key: String,
    titled: bool,
}

fn bare(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

fn is_prefix_title(word: &str) -> bool {
    word.chars().next().is_some_and(|c| c.is_uppercase())
        && PREFIX_TITLE_SET.contains(bare(word).as_str())
}

fn is_name_part(word: &str) -> bool {
    is_name_token(word) && !TITLE_SET.contains(bare(word).as_str())
}

fn ends_clause(word: &str) -> bool {
    word.ends_with(|c: char| matches!(c, ',' | '.' | ';' | ':' | '!' | '?' | ')'))
}

fn is_role_word(word: &str) -> bool {
    tokenize(word).iter().any(|t| ROLE_SET.contains(t.as_str()))
}

/// Honorific-led names ("Dr. Ann Lee") and runs of two or more capitalized
/// name words ("Alice Wong"). A run stops at clause punctuation. An untitled
/// run followed directly by a role word is a job title ("Chief Medical
/// Officer"), not a name.
fn name_mentions(words: &[&str]) -> Vec<NameMention> {
    let mut mentions = Vec::new();
    let mut i = 0;
    while i < words.len() {
        let titled = is_prefix_title(words[i]);
        let name_start = if titled { i + 1 } else { i };

        let mut j = name_start;
        while j < words.len() && j - name_start < MAX_NAME_WORDS && is_name_part(words[j]) {
            j += 1;
            if ends_clause(words[j - 1]) {
                break;
            }
        }

        let name_words = j - name_start;
        let role_title = !titled
            && j > name_start
            && !ends_clause(words[j - 1])
            && words.get(j).is_some_and(|w| is_role_word(w));

        if role_title {
            i = j;
        } else if (titled && name_words >= 1) || name_words >= 2 {
            let key = words[name_start..j]
                .iter()
                .map(|w| bare(w))
                .collect::<Vec<_>>()
                .join(" ");
            mentions.push(NameMention {
                start: i,
                end: j,
                key,
                titled,
            });
            i = j;
        } else {
            i += 1;
        }
    }
    mentions
}

/// Distinct people mentioned in the text.
///
/// A titled name counts on its own. An untitled name counts only when a role
/// word is bound to it: within a few words after it and before the next name,
/// or directly in front of it ("CEO Jane Roe"). One person described with many
/// roles counts once, and a listing of people who share a role counts each
/// person.
pub fn person_indicator_count(text: &str) -> usize {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mentions = name_mentions(&words);

    let mut people: HashSet<&str> = HashSet::new();
    for (index, mention) in mentions.iter().enumerate() {
        let bound = mention.titled || {
            let next_start = mentions
                .get(index + 1)
                .map(|m| m.start)
                .unwrap_or(words.len());
            let after_end = next_start.min(mention.end + ROLE_WINDOW_AFTER);
            let after = words[mention.end..after_end.max(mention.end)]
                .iter()
                .any(|w| is_role_word(w));

            let before = mention
                .start
                .checked_sub(1)
                .map(|k| words[k])
                .is_some_and(|w| !ends_clause(w) && is_role_word(w));

            after || before
        };

        if bound {
            people.insert(mention.key.as_str());
        }
    }
    people.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Dr. Sarah Chen, CEO & co-founder"),
            vec!["dr", "sarah", "chen", "ceo", "co", "founder"]
        );
    }

    #[test]
    fn test_name_tokens() {
        assert!(is_name_token("Sarah"));
        assert!(is_name_token("Dr."));
        assert!(is_name_token("O'Brien"));
        assert!(!is_name_token("Team"));
        assert!(!is_name_token("the"));
        assert!(!is_name_token("Director"));
        assert!(!is_name_token("2024"));
    }

    #[test]
    fn test_collective_headings() {
        assert!(is_collective_heading("Our Team"));
        assert!(is_collective_heading("Meet the Leadership"));
        assert!(is_collective_heading("Staff Directory"));
        assert!(is_collective_heading("All Products"));
        assert!(is_collective_heading("Board of Directors"));
        assert!(is_collective_heading("Our Leadership Team:"));
        assert!(is_collective_heading("Faculty & Staff"));
        assert!(is_collective_heading("Who We Are"));
        assert!(!is_collective_heading("Sarah Chen"));
        assert!(!is_collective_heading("Acme Widget Pro"));
    }

    #[test]
    fn test_singular_role_headings_are_not_collective() {
        assert!(!is_collective_heading("Our Founder"));
        assert!(!is_collective_heading("Meet the Founder"));
        assert!(!is_collective_heading("Jane Roe, Staff Engineer"));
        assert!(!is_collective_heading("Team Lead: Omar Haddad"));
        assert!(!is_collective_heading("More about Jane Roe"));
    }

    #[test]
    fn test_contact_signal() {
        assert!(has_contact_signal("Reach me at jane@example.org"));
        assert!(has_contact_signal("Call (612) 555-0100"));
        assert!(has_contact_signal("linkedin.com/in/janedoe"));
        assert!(!has_contact_signal("Jane enjoys hiking"));
    }

    #[test]
    fn test_person_indicators_count_distinct() {
        let text = "Dr. Alice Wong, CEO. Mr. Bob Lee, CTO. Ms. Carol Diaz, Director. \
                    Prof. Dan Ito, Advisor. Dr. Alice Wong, CEO.";
        assert_eq!(person_indicator_count(text), 4);
        assert_eq!(person_indicator_count("A quiet afternoon"), 0);
    }

    #[test]
    fn test_one_person_with_many_roles_counts_once() {
        let bio = "Jane Roe is a staff engineer on the platform group. She was previously \
                   an engineering manager and director of infrastructure, and is an \
                   advisor to two startups.";
        assert_eq!(person_indicator_count(bio), 1);

        let founder = "Dr. Maria Lopez is our founder and CEO. She also serves as president \
                       and chair of the board.";
        assert_eq!(person_indicator_count(founder), 1);
    }

    #[test]
    fn test_people_sharing_a_role_each_count() {
        let team = "Alice Wong, Software Engineer. Bob Lee, Software Engineer. \
                    Carol Diaz, Software Engineer. Dan Ito, Software Engineer.";
        assert_eq!(person_indicator_count(team), 4);

        let leading = "CEO Alice Wong; CTO Bob Lee";
        assert_eq!(person_indicator_count(leading), 2);
    }

    #[test]
    fn test_role_titles_and_employers_are_not_people() {
        let text = "Sarah Chen is the Chief Medical Officer at Acme Health. She leads \
                    clinical research across three hospitals.";
        assert_eq!(person_indicator_count(text), 1);
    }

    #[test]
    fn test_names_without_roles_need_an_honorific() {
        assert_eq!(person_indicator_count("Visit Acme Labs in New York"), 0);
        assert_eq!(person_indicator_count("Dr. Ann Lee. Dr. Bo Park."), 2);
    }
}
