//! Push key generation.
//!
//! Push keys are 20 characters long: 8 characters encoding the millisecond
//! timestamp followed by 12 random characters. The alphabet is ordered by
//! ASCII value, so keys generated later sort after keys generated earlier.
//! Keys generated within the same millisecond increment the random suffix
//! of the previous key instead of drawing a new one.

use parking_lot::Mutex;
use rand::Rng;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Length of a generated push key.
pub const PUSH_KEY_LEN: usize = 20;

/// Generates chronologically ordered unique keys.
#[derive(Debug, Default)]
pub struct PushKeyGenerator {
    state: Mutex<GeneratorState>,
}

#[derive(Debug, Default)]
struct GeneratorState {
    last_millis: u64,
    last_random: [u8; 12],
}

impl PushKeyGenerator {
    /// Creates a new generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a key for the given timestamp in milliseconds.
    pub fn generate(&self, now_millis: u64) -> String {
        let mut state = self.state.lock();
        let duplicate = now_millis == state.last_millis;
        state.last_millis = now_millis;

        let mut key = String::with_capacity(PUSH_KEY_LEN);
        let mut millis = now_millis;
        let mut time_chars = [0u8; 8];
        for slot in time_chars.iter_mut().rev() {
            *slot = PUSH_CHARS[(millis % 64) as usize];
            millis /= 64;
        }
        key.extend(time_chars.iter().map(|&c| c as char));

        if duplicate {
            // Carry the increment through the suffix.
            let mut i = 11;
            loop {
                if state.last_random[i] == 63 {
                    state.last_random[i] = 0;
                    if i == 0 {
                        break;
                    }
                    i -= 1;
                } else {
                    state.last_random[i] += 1;
                    break;
                }
            }
        } else {
            let mut rng = rand::thread_rng();
            for slot in &mut state.last_random {
                *slot = rng.gen_range(0..64);
            }
        }
        key.extend(
            state
                .last_random
                .iter()
                .map(|&i| PUSH_CHARS[i as usize] as char),
        );
        key
    }
}
