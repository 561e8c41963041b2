use rand::Rng;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Random lowercase-alphanumeric identifier of the given length.
pub fn random_id(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// `msg_` id for an Anthropic-style message envelope.
pub fn message_id() -> String {
    format!("msg_{}", random_id(24))
}

/// `chatcmpl-` id for an OpenAI chat completion.
pub fn completion_id() -> String {
    format!("chatcmpl-{}", random_id(24))
}

/// `resp_` id for an OpenAI Responses envelope.
pub fn response_id() -> String {
    format!("resp_{}", random_id(24))
}

/// `toolu_` id for a tool invocation missing one in the source text.
pub fn tool_use_id() -> String {
    format!("toolu_{}", random_id(24))
}

/// Bare id for an upstream turn.
pub fn turn_id() -> String {
    random_id(22)
}
