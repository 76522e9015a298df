//! German perturbation lexicon
//!
//! Word lists the injection engine draws its edits from. Lookups are
//! case-insensitive; callers restore casing with [`crate::tokenize::match_case`].

/// Negation tokens and their inversion. `None` means the token is dropped.
pub const NEGATIONS: &[(&str, Option<&str>)] = &[
    ("nicht", None),
    ("kein", Some("ein")),
    ("keine", Some("eine")),
    ("keinen", Some("einen")),
    ("keinem", Some("einem")),
    ("keiner", Some("einer")),
    ("keines", Some("eines")),
    ("nie", Some("immer")),
    ("niemals", Some("immer")),
    ("nichts", Some("etwas")),
    ("niemand", Some("jemand")),
    ("nirgends", Some("überall")),
    ("nirgendwo", Some("überall")),
];

/// Polarity antonyms, usable in both directions.
pub const POLARITY: &[(&str, &str)] = &[
    ("sicher", "unsicher"),
    ("erlaubt", "verboten"),
    ("möglich", "unmöglich"),
    ("richtig", "falsch"),
    ("gut", "schlecht"),
    ("gesund", "ungesund"),
    ("wirksam", "unwirksam"),
    ("gültig", "ungültig"),
    ("zulässig", "unzulässig"),
    ("geeignet", "ungeeignet"),
    ("immer", "nie"),
    ("positiv", "negativ"),
    ("erfolgreich", "erfolglos"),
    ("akzeptiert", "abgelehnt"),
    ("bestätigt", "widerrufen"),
];

/// Lexical confusions a careless translation could produce.
pub const CONFUSIONS: &[(&str, &str)] = &[
    ("links", "rechts"),
    ("oben", "unten"),
    ("innen", "außen"),
    ("norden", "süden"),
    ("osten", "westen"),
    ("öffnen", "schließen"),
    ("geöffnet", "geschlossen"),
    ("erhöhen", "senken"),
    ("heiß", "kalt"),
    ("eingang", "ausgang"),
    ("einfahrt", "ausfahrt"),
    ("ankunft", "abfahrt"),
    ("kaufen", "verkaufen"),
    ("gestern", "morgen"),
    ("früh", "spät"),
    ("morgens", "abends"),
    ("einschalten", "ausschalten"),
    ("eingeschaltet", "ausgeschaltet"),
    ("minuten", "stunden"),
    ("tage", "wochen"),
    ("monate", "jahre"),
];

/// German number words.
pub const NUMBER_WORDS: &[&str] = &[
    "null", "eins", "zwei", "drei", "vier", "fünf", "sechs", "sieben", "acht", "neun", "zehn",
    "elf", "zwölf", "zwanzig", "dreißig", "hundert", "tausend",
];

/// Safety-critical terms and a weakening substitute.
pub const SAFETY_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("mindestens", "höchstens"),
    ("höchstens", "mindestens"),
    ("maximal", "minimal"),
    ("minimal", "maximal"),
    ("nur", "auch"),
    ("ausschließlich", "auch"),
    ("giftig", "ungiftig"),
    ("gefährlich", "ungefährlich"),
    ("warnung", "hinweis"),
    ("lebensgefahr", "gefahr"),
    ("sofort", "später"),
    ("dringend", "gelegentlich"),
    ("verschreibungspflichtig", "rezeptfrei"),
    ("notfall", "zwischenfall"),
];

/// Safety modifiers whose omission weakens an instruction.
pub const SAFETY_OMISSIONS: &[&str] = &[
    "unbedingt",
    "stets",
    "sorgfältig",
    "vorsichtig",
    "gründlich",
    "ausdrücklich",
];

/// Named-entity gazetteer grouped by class; swaps stay within a class.
pub const ENTITY_CLASSES: &[(&str, &[&str])] = &[
    (
        "country",
        &[
            "Deutschland", "Frankreich", "Italien", "Spanien", "Österreich", "Schweiz", "Polen",
            "Niederlande", "Belgien", "England", "Irland", "Schweden", "Norwegen", "Dänemark",
            "Russland", "China", "Japan", "Indien", "Kanada", "Mexiko", "Brasilien", "Australien",
            "Großbritannien", "Ukraine", "Türkei", "Griechenland",
        ],
    ),
    (
        "city",
        &[
            "Berlin", "Hamburg", "München", "Köln", "Frankfurt", "Stuttgart", "Düsseldorf",
            "Leipzig", "Dresden", "Wien", "Zürich", "Paris", "London", "Rom", "Madrid", "Brüssel",
            "Amsterdam", "Warschau", "Prag", "Lissabon", "Dublin", "Edinburgh", "Manchester",
            "Washington", "Peking", "Tokio",
        ],
    ),
    (
        "weekday",
        &["Montag", "Dienstag", "Mittwoch", "Donnerstag", "Freitag", "Samstag", "Sonntag"],
    ),
    (
        "month",
        &[
            "Januar", "Februar", "März", "April", "Juni", "Juli", "September", "Oktober",
            "November", "Dezember",
        ],
    ),
    (
        "organization",
        &["EU", "UNO", "NATO", "WHO", "NHS", "BBC", "Google", "Microsoft", "Siemens", "Amazon"],
    ),
    (
        "person",
        &[
            "Anna", "Maria", "Peter", "Thomas", "Michael", "Julia", "Johnson", "Smith", "Müller",
            "Schmidt", "Schneider", "Fischer", "Weber", "Meyer", "Wagner", "Becker", "Brown",
            "Taylor",
        ],
    ),
];

/// Class used to replace source-aligned names the gazetteer does not know.
pub const FALLBACK_ENTITY_CLASS: &str = "person";

/// Mild pejoratives for hallucinated toxicity.
pub const PEJORATIVES: &[&str] = &["verdammte", "dämliche", "blöde", "miese"];

/// Profane tails appended when no insertion point exists.
pub const INTERJECTIONS: &[&str] = &[", verdammt noch mal", ", so ein Mist"];

/// Function words never treated as content or noun tokens.
pub const FUNCTION_WORDS: &[&str] = &[
    "der", "die", "das", "den", "dem", "des", "ein", "eine", "einen", "einem", "einer", "eines",
    "und", "oder", "aber", "mit", "von", "zu", "zum", "zur", "im", "in", "am", "an", "auf", "für",
    "ist", "sind", "war", "wird", "werden", "hat", "haben", "sie", "er", "es", "wir", "ihr",
    "ich", "du", "nicht", "auch", "sich", "bei", "aus", "nach", "über", "unter", "vor", "dass",
    "wenn", "als", "wie", "so", "bitte", "ihnen",
];

fn eq(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Inversion for a negation token, if it is one.
pub fn negation(word: &str) -> Option<Option<&'static str>> {
    NEGATIONS
        .iter()
        .find(|(neg, _)| eq(neg, word))
        .map(|(_, replacement)| *replacement)
}

fn pair_lookup(pairs: &'static [(&'static str, &'static str)], word: &str) -> Option<&'static str> {
    pairs.iter().find_map(|(a, b)| {
        if eq(a, word) {
            Some(*b)
        } else if eq(b, word) {
            Some(*a)
        } else {
            None
        }
    })
}

pub fn polarity_antonym(word: &str) -> Option<&'static str> {
    pair_lookup(POLARITY, word)
}

pub fn confusion(word: &str) -> Option<&'static str> {
    pair_lookup(CONFUSIONS, word)
}

pub fn safety_substitute(word: &str) -> Option<&'static str> {
    SAFETY_SUBSTITUTIONS
        .iter()
        .find(|(term, _)| eq(term, word))
        .map(|(_, replacement)| *replacement)
}

pub fn is_safety_modifier(word: &str) -> bool {
    SAFETY_OMISSIONS.iter().any(|m| eq(m, word))
}

pub fn number_word_index(word: &str) -> Option<usize> {
    NUMBER_WORDS.iter().position(|n| eq(n, word))
}

pub fn is_function_word(word: &str) -> bool {
    FUNCTION_WORDS.iter().any(|f| eq(f, word))
}

/// Gazetteer class and members for an entity, matched case-sensitively so
/// that ordinary lowercase words never count as names.
pub fn entity_class(word: &str) -> Option<(&'static str, &'static [&'static str])> {
    ENTITY_CLASSES
        .iter()
        .find(|(_, members)| members.iter().any(|m| *m == word))
        .map(|(class, members)| (*class, *members))
}

pub fn entity_members(class: &str) -> &'static [&'static str] {
    ENTITY_CLASSES
        .iter()
        .find(|(name, _)| *name == class)
        .map(|(_, members)| *members)
        .unwrap_or(&[])
}
