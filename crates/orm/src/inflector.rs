//! English inflections
//!
//! Class name ↔ table name conversions used for relation defaults:
//! `Tag` ↔ `tags`, `Category` ↔ `categories`, `Person` ↔ `people`.

use once_cell::sync::Lazy;
use regex::Regex;

type Rules = Vec<(Regex, &'static str)>;

fn compile(rules: &[(&str, &'static str)]) -> Rules {
    rules
        .iter()
        .filter_map(|(pattern, replacement)| {
            Regex::new(&format!("(?i){}", pattern))
                .ok()
                .map(|re| (re, *replacement))
        })
        .collect()
}

static PLURAL_RULES: Lazy<Rules> = Lazy::new(|| {
    compile(&[
        ("^(ox)$", "${1}en"),
        ("([ml])ouse$", "${1}ice"),
        ("(matr|vert|ind)(?:ix|ex)$", "${1}ices"),
        ("(x|ch|ss|sh)$", "${1}es"),
        ("([^aeiouy]|qu)y$", "${1}ies"),
        ("(hive)$", "${1}s"),
        ("(?:([^f])fe|([lr])f)$", "${1}${2}ves"),
        ("sis$", "ses"),
        ("([ti])um$", "${1}a"),
        ("(p)erson$", "${1}eople"),
        ("(m)an$", "${1}en"),
        ("(c)hild$", "${1}hildren"),
        ("(buffal|tomat)o$", "${1}oes"),
        ("(bu)s$", "${1}ses"),
        ("(alias|status)$", "${1}es"),
        ("(octop|vir)us$", "${1}i"),
        ("(ax|cri|test)is$", "${1}es"),
        ("s$", "s"),
        ("$", "s"),
    ])
});

static SINGULAR_RULES: Lazy<Rules> = Lazy::new(|| {
    compile(&[
        ("(matr)ices$", "${1}ix"),
        ("(vert|ind)ices$", "${1}ex"),
        ("^(ox)en$", "${1}"),
        ("(alias|status)es$", "${1}"),
        ("(octop|vir)i$", "${1}us"),
        ("(cris|ax|test)es$", "${1}is"),
        ("(shoe)s$", "${1}"),
        ("(o)es$", "${1}"),
        ("(bus)es$", "${1}"),
        ("([ml])ice$", "${1}ouse"),
        ("(x|ch|ss|sh)es$", "${1}"),
        ("(m)ovies$", "${1}ovie"),
        ("(s)eries$", "${1}eries"),
        ("([^aeiouy]|qu)ies$", "${1}y"),
        ("([lr])ves$", "${1}f"),
        ("(tive)s$", "${1}"),
        ("(hive)s$", "${1}"),
        ("([^f])ves$", "${1}fe"),
        ("((a)naly|(b)a|(d)iagno|(p)arenthe|(p)rogno|(s)ynop|(t)he)ses$", "${1}sis"),
        ("([ti])a$", "${1}um"),
        ("(p)eople$", "${1}erson"),
        ("(m)en$", "${1}an"),
        ("(c)hildren$", "${1}hild"),
        ("(n)ews$", "${1}ews"),
        ("s$", ""),
    ])
});

const UNCOUNTABLE: &[&str] = &[
    "equipment", "information", "rice", "money", "species", "series", "fish", "sheep", "cms",
    "bison", "bream", "breeches", "britches", "buffalo", "carp", "chassis", "clippers", "cod",
    "contretemps", "corps", "debris", "diabetes", "djinn", "eland", "elk", "flounder", "gallows",
    "graffiti", "headquarters", "herpes", "hijinks", "innings", "jackanapes", "mackerel", "mews",
    "moose", "mumps", "news", "nexus", "pincers", "pliers", "proceedings", "rabies",
    "rhinoceros", "salmon", "scissors", "sea bass", "sea-bass", "shears", "siemens", "swine",
    "testes", "trousers", "trout", "tuna", "whiting", "wildebeest",
];

fn is_uncountable(word: &str) -> bool {
    let lowered = word.to_lowercase();
    let last = lowered.rsplit('_').next().unwrap_or(&lowered);
    UNCOUNTABLE.contains(&last)
}

fn apply(rules: &Rules, word: &str) -> String {
    if word.is_empty() || is_uncountable(word) {
        return word.to_string();
    }
    rules
        .iter()
        .find(|(re, _)| re.is_match(word))
        .map(|(re, replacement)| re.replace(word, *replacement).into_owned())
        .unwrap_or_else(|| word.to_string())
}

/// `post` → `posts`, `category` → `categories`
pub fn pluralize(word: &str) -> String {
    apply(&PLURAL_RULES, word)
}

/// `posts` → `post`, `people` → `person`
pub fn singularize(word: &str) -> String {
    apply(&SINGULAR_RULES, word)
}

pub fn is_plural(word: &str) -> bool {
    pluralize(word) == word
}

pub fn is_singular(word: &str) -> bool {
    singularize(word) == word
}

/// `user_tag` → `UserTag`
pub fn camelize(word: &str) -> String {
    word.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// `UserTag` → `user_tag`, `HTMLPage` → `html_page`
pub fn underscore(word: &str) -> String {
    let chars: Vec<char> = word.chars().collect();
    let mut out = String::with_capacity(word.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).map_or(false, |n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower) {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }
    out.replace("::", "/")
}

/// `first_name` → `First name`
pub fn humanize(word: &str) -> String {
    let lowered = word.replace('_', " ").to_lowercase();
    let mut chars = lowered.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => lowered,
    }
}

/// Strip a module path: `admin::User` → `User`
pub fn demodulize(class_name: &str) -> &str {
    class_name.rsplit("::").next().unwrap_or(class_name)
}

/// `BlogPost` → `blog_posts`
pub fn tableize(class_name: &str) -> String {
    pluralize(&underscore(demodulize(class_name)))
}

/// `blog_posts` → `BlogPost`
pub fn classify(table_name: &str) -> String {
    camelize(&singularize(table_name))
}

/// `BlogPost` → `blog_post_id`
pub fn foreign_key(class_name: &str) -> String {
    format!("{}_id", underscore(demodulize(class_name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("tag"), "tags");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("person"), "people");
        assert_eq!(pluralize("address"), "addresses");
        assert_eq!(pluralize("status"), "statuses");
        assert_eq!(pluralize("posts"), "posts");
        assert_eq!(pluralize("news"), "news");
        assert_eq!(pluralize("wife"), "wives");
        assert_eq!(pluralize("blog_post"), "blog_posts");
    }

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("tags"), "tag");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("people"), "person");
        assert_eq!(singularize("addresses"), "address");
        assert_eq!(singularize("statuses"), "status");
        assert_eq!(singularize("profiles"), "profile");
        assert_eq!(singularize("movies"), "movie");
        assert_eq!(singularize("series"), "series");
        assert_eq!(singularize("data"), "datum");
    }

    #[test]
    fn test_case_conversions() {
        assert_eq!(camelize("user_tag"), "UserTag");
        assert_eq!(underscore("UserTag"), "user_tag");
        assert_eq!(underscore("HTMLPage"), "html_page");
        assert_eq!(humanize("first_name"), "First name");
        assert_eq!(demodulize("admin::User"), "User");
    }

    #[test]
    fn test_table_and_class_names() {
        assert_eq!(tableize("BlogPost"), "blog_posts");
        assert_eq!(tableize("Person"), "people");
        assert_eq!(classify("posts"), "Post");
        assert_eq!(classify("categories"), "Category");
        assert_eq!(classify("profile"), "Profile");
        assert_eq!(foreign_key("BlogPost"), "blog_post_id");
    }
}
