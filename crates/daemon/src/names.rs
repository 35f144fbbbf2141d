use rand::Rng;

const ADJECTIVES: [&str; 16] = [
    "amber", "bold", "calm", "dapper", "eager", "fuzzy", "gentle", "hazy", "ivory", "jolly",
    "keen", "lucid", "mellow", "noble", "opal", "quiet",
];

const NOUNS: [&str; 16] = [
    "anchor", "beacon", "cedar", "delta", "ember", "falcon", "garnet", "harbor", "island",
    "juniper", "kestrel", "lagoon", "meadow", "nimbus", "orchid", "pebble",
];

/// Human-friendly resource name used when the backend does not supply one.
/// Not required to be unique.
pub fn random_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
    let suffix: u16 = rng.gen_range(0..1000);
    format!("{adjective}-{noun}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_have_the_expected_shape() {
        for _ in 0..100 {
            let name = random_name();
            let parts: Vec<&str> = name.split('-').collect();
            assert_eq!(parts.len(), 3);
            assert!(ADJECTIVES.contains(&parts[0]));
            assert!(NOUNS.contains(&parts[1]));
            assert!(parts[2].parse::<u16>().unwrap() < 1000);
        }
    }
}
