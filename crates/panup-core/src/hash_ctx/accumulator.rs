use sha1::compress;

pub(crate) const BLOCK_LEN: usize = 64;

/// One block through the `sha1` compression function, which takes
/// `GenericArray` blocks.
fn compress_block(state: &mut [u32; 5], block: [u8; BLOCK_LEN]) {
    compress(state, &[block.into()]);
}

pub(crate) const INITIAL_STATE: [u32; 5] = [
    0x6745_2301,
    0xEFCD_AB89,
    0x98BA_DCFE,
    0x1032_5476,
    0xC3D2_E1F0,
];

/// Streaming SHA-1 whose internal state can be inspected and rebuilt.
///
/// Block processing is delegated to the `sha1` crate's compression
/// function; this type only owns the chaining words, the byte counter and
/// the partial block, which is exactly what a [`HashState`](super::HashState)
/// carries across process boundaries.
#[derive(Clone)]
pub struct Sha1Accumulator {
    pub(crate) state: [u32; 5],
    pub(crate) len: u64,
    pub(crate) buffer: [u8; BLOCK_LEN],
    pub(crate) buffer_len: usize,
}

impl Sha1Accumulator {
    pub fn new() -> Self {
        Self {
            state: INITIAL_STATE,
            len: 0,
            buffer: [0u8; BLOCK_LEN],
            buffer_len: 0,
        }
    }

    /// Total number of bytes fed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.len
    }

    pub fn update(&mut self, mut data: &[u8]) {
        self.len = self.len.wrapping_add(data.len() as u64);

        if self.buffer_len > 0 {
            let take = (BLOCK_LEN - self.buffer_len).min(data.len());
            self.buffer[self.buffer_len..self.buffer_len + take].copy_from_slice(&data[..take]);
            self.buffer_len += take;
            data = &data[take..];
            if self.buffer_len < BLOCK_LEN {
                return;
            }
            compress_block(&mut self.state, self.buffer);
            self.buffer_len = 0;
        }

        let mut blocks = data.chunks_exact(BLOCK_LEN);
        for chunk in &mut blocks {
            let mut block = [0u8; BLOCK_LEN];
            block.copy_from_slice(chunk);
            compress_block(&mut self.state, block);
        }

        let rest = blocks.remainder();
        self.buffer[..rest.len()].copy_from_slice(rest);
        self.buffer_len = rest.len();
    }

    /// Digest of everything fed so far. The accumulator stays usable.
    pub fn digest(&self) -> [u8; 20] {
        let mut state = self.state;
        let mut block = [0u8; BLOCK_LEN];
        block[..self.buffer_len].copy_from_slice(&self.buffer[..self.buffer_len]);
        block[self.buffer_len] = 0x80;

        if self.buffer_len + 1 > BLOCK_LEN - 8 {
            compress_block(&mut state, block);
            block = [0u8; BLOCK_LEN];
        }
        let bit_len = self.len.wrapping_mul(8);
        block[BLOCK_LEN - 8..].copy_from_slice(&bit_len.to_be_bytes());
        compress_block(&mut state, block);

        let mut out = [0u8; 20];
        for (word, dst) in state.iter().zip(out.chunks_exact_mut(4)) {
            dst.copy_from_slice(&word.to_be_bytes());
        }
        out
    }

    pub fn hex_digest(&self) -> String {
        hex::encode(self.digest())
    }
}

impl Default for Sha1Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Sha1Accumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sha1Accumulator")
            .field("bytes_hashed", &self.len)
            .field("pending", &self.buffer_len)
            .finish()
    }
}
