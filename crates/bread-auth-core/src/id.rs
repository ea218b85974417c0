// Unique-id generation, nanoid-based.

/// Generate a unique identifier (21 characters).
pub fn generate_id() -> String {
    nanoid::nanoid!()
}

/// Generate an identifier with a custom length.
pub fn generate_id_with_length(len: usize) -> String {
    nanoid::nanoid!(len)
}
