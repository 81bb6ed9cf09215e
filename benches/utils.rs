use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::{Value, json};

/// Generates `n` user profiles with a handful of items each.
pub fn generate_random_contexts(n: usize) -> Vec<Value> {
    // Fixed seed so runs are comparable.
    let mut rng = StdRng::seed_from_u64(42);

    (0..n)
        .map(|_| {
            let items: Vec<Value> = (0..rng.random_range(3..10))
                .map(|_| {
                    json!({
                        "name": random_word(&mut rng, 3, 8),
                        "value": rng.random_range(10..1000),
                        "special": rng.random_bool(0.3),
                    })
                })
                .collect();

            json!({
                "user": {
                    "name": random_word(&mut rng, 5, 10),
                    "age": rng.random_range(18..80),
                    "active": rng.random_bool(0.7),
                },
                "items": items,
                "show_details": rng.random_bool(0.8),
                "has_access": rng.random_bool(0.6),
            })
        })
        .collect()
}

fn random_word(rng: &mut StdRng, min_len: usize, max_len: usize) -> String {
    let len = rng.random_range(min_len..=max_len);
    (0..len).map(|_| char::from(rng.random_range(b'a'..=b'z'))).collect()
}

pub fn print_binary_size() {
    let binary_path = std::env::current_exe().unwrap();
    let size_bytes = std::fs::metadata(&binary_path).unwrap().len();
    println!(
        "Binary size: {:.2} KB ({size_bytes} bytes) at {}",
        size_bytes as f64 / 1024.0,
        binary_path.display()
    );
}
