use rand::Rng;

pub const CODE_LENGTH: usize = 6;

pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Uniform six-digit numeric codes from the thread-local RNG.
///
/// Not reviewed for cryptographic strength; the short TTL and attempt limit
/// are what bound guessing.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> String {
        let value: u32 = rand::thread_rng().gen_range(0..1_000_000);
        format!("{value:06}")
    }
}

#[cfg(test)]
mod tests {
    use super::{CODE_LENGTH, CodeGenerator, RandomCodeGenerator};

    #[test]
    fn codes_are_six_ascii_digits() {
        let generator = RandomCodeGenerator;
        for _ in 0..200 {
            let code = generator.generate();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
