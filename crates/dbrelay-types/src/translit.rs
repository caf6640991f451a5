//! Reversible Cyrillic ↔ Latin transliteration for login names.
//!
//! Backends that only accept ASCII role names receive the Latin form. The
//! reverse direction matches the longest Latin sequence first, so `Shh`
//! becomes `Щ` rather than `Ш` followed by `h`. Where several Cyrillic letters
//! share a Latin form (`Е`/`Э` → `E`, `И`/`Ь` → `I`), the reverse mapping
//! picks the one listed first in [`ALPHABET`]; `Ъ` is dropped.

/// Cyrillic letter and its Latin spelling, in lookup order.
#[rustfmt::skip]
pub const ALPHABET: &[(char, &str)] = &[
    ('А', "A"), ('а', "a"),
    ('Б', "B"), ('б', "b"),
    ('В', "V"), ('в', "v"),
    ('Г', "G"), ('г', "g"),
    ('Д', "D"), ('д', "d"),
    ('Е', "E"), ('е', "e"),
    ('Ж', "Zh"), ('ж', "zh"),
    ('З', "Z"), ('з', "z"),
    ('И', "I"), ('и', "i"),
    ('Й', "J"), ('й', "j"),
    ('К', "K"), ('к', "k"),
    ('Л', "L"), ('л', "l"),
    ('М', "M"), ('м', "m"),
    ('Н', "N"), ('н', "n"),
    ('О', "O"), ('о', "o"),
    ('П', "P"), ('п', "p"),
    ('Р', "R"), ('р', "r"),
    ('С', "S"), ('с', "s"),
    ('Т', "T"), ('т', "t"),
    ('У', "U"), ('у', "u"),
    ('Ф', "F"), ('ф', "f"),
    ('Х', "H"), ('х', "h"),
    ('Ц', "Ts"), ('ц', "ts"),
    ('Ч', "Ch"), ('ч', "ch"),
    ('Ш', "Sh"), ('ш', "sh"),
    ('Щ', "Shh"), ('щ', "shh"),
    ('Ь', "I"), ('ь', "i"),
    ('Ю', "Yu"), ('ю', "yu"),
    ('Я', "Ya"), ('я', "ya"),
    ('Ы', "Y"), ('ы', "y"),
    ('Ъ', ""), ('ъ', ""),
    ('Ё', "Yo"), ('ё', "yo"),
    ('Э', "E"), ('э', "e"),
];

const LONGEST_LATIN: usize = 3;

/// Transliterates Cyrillic letters to Latin. Other characters pass through.
pub fn to_latin(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ALPHABET.iter().find(|(cyr, _)| *cyr == ch) {
            Some((_, latin)) => out.push_str(latin),
            None => out.push(ch),
        }
    }
    out
}

/// Reverses [`to_latin`], matching the longest Latin sequence at each step.
pub fn to_cyrillic(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() * 2);
    let mut pos = 0;

    'outer: while pos < chars.len() {
        for len in (1..=LONGEST_LATIN.min(chars.len() - pos)).rev() {
            let candidate: String = chars[pos..pos + len].iter().collect();
            if let Some((cyr, _)) = ALPHABET
                .iter()
                .find(|(_, latin)| !latin.is_empty() && *latin == candidate)
            {
                out.push(*cyr);
                pos += len;
                continue 'outer;
            }
        }
        out.push(chars[pos]);
        pos += 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin_form_of_common_names() {
        assert_eq!(to_latin("Иванов"), "Ivanov");
        assert_eq!(to_latin("Жуков"), "Zhukov");
        assert_eq!(to_latin("Щукин"), "Shhukin");
        assert_eq!(to_latin("Чехов"), "Chehov");
    }

    #[test]
    fn ascii_passes_through_unchanged() {
        assert_eq!(to_latin("admin_01"), "admin_01");
        assert_eq!(to_cyrillic("_01-"), "_01-");
    }

    #[test]
    fn reverse_prefers_longest_match() {
        assert_eq!(to_cyrillic("Shhukin"), "Щукин");
        assert_eq!(to_cyrillic("Zhukov"), "Жуков");
        assert_eq!(to_cyrillic("Tsvetkov"), "Цветков");
    }

    #[test]
    fn names_without_ambiguous_letters_survive_both_directions() {
        for name in ["Иванов", "Жуков", "Юдина", "Яковлев", "Щукин", "Чехов"] {
            assert_eq!(to_cyrillic(&to_latin(name)), name, "name: {name}");
        }
    }

    #[test]
    fn hard_sign_is_dropped() {
        assert_eq!(to_latin("Подъезд"), "Podezd");
    }
}
