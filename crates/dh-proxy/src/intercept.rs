//! Interception transforms applied to client-to-server plaintext

/// A pure, stateless rewrite of one decrypted client message
pub trait Transform: Send + Sync {
    /// Produce the plaintext forwarded to the real server
    fn apply(&self, plaintext: &[u8]) -> Vec<u8>;
}

impl<F> Transform for F
where
    F: Fn(&[u8]) -> Vec<u8> + Send + Sync,
{
    fn apply(&self, plaintext: &[u8]) -> Vec<u8> {
        self(plaintext)
    }
}

/// Replace every occurrence of one literal token with another
#[derive(Clone, Debug)]
pub struct ReplaceToken {
    from: Vec<u8>,
    to: Vec<u8>,
}

impl ReplaceToken {
    pub fn new(from: impl Into<Vec<u8>>, to: impl Into<Vec<u8>>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl Default for ReplaceToken {
    fn default() -> Self {
        Self::new("transfer", "hacked")
    }
}

impl Transform for ReplaceToken {
    fn apply(&self, plaintext: &[u8]) -> Vec<u8> {
        replace_all(plaintext, &self.from, &self.to)
    }
}

/// Forward plaintext unchanged
#[derive(Clone, Copy, Debug, Default)]
pub struct Passthrough;

impl Transform for Passthrough {
    fn apply(&self, plaintext: &[u8]) -> Vec<u8> {
        plaintext.to_vec()
    }
}

/// Non-overlapping, left-to-right replacement; an empty needle is a no-op
fn replace_all(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    if from.is_empty() || haystack.len() < from.len() {
        return haystack.to_vec();
    }

    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(from) {
            out.extend_from_slice(to);
            i += from.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}
