//! Builds scenario images in memory, for this crate's tests and its
//! integration tests.

use super::compression::{apply_base_mask, XorKeyTable};
use super::scenario::header::HEADER_SIZE;

pub struct ScenarioBuilder {
    body: Vec<u8>,
    version: i32,
    key: Option<&'static XorKeyTable>,
    kidoku: Vec<i32>,
    dramatis: Vec<Vec<u8>>,
    metadata: Option<(Vec<u8>, u8)>,
    savepoints: [i32; 3],
}

impl ScenarioBuilder {
    pub fn new(body: &[u8]) -> Self {
        Self {
            body: body.to_vec(),
            version: 10002,
            key: None,
            kidoku: vec![],
            dramatis: vec![],
            metadata: None,
            savepoints: [0; 3],
        }
    }

    pub fn version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    pub fn second_layer(mut self, key: &'static XorKeyTable) -> Self {
        self.version = 110002;
        self.key = Some(key);
        self
    }

    pub fn kidoku(mut self, table: Vec<i32>) -> Self {
        self.kidoku = table;
        self
    }

    pub fn dramatis<N: AsRef<[u8]>>(mut self, names: &[N]) -> Self {
        self.dramatis = names.iter().map(|n| n.as_ref().to_vec()).collect();
        self
    }

    pub fn metadata(mut self, compiler_id: &[u8], encoding: u8) -> Self {
        self.metadata = Some((compiler_id.to_vec(), encoding));
        self
    }

    pub fn savepoints(mut self, flags: [i32; 3]) -> Self {
        self.savepoints = flags;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_SIZE];

        let kidoku_offset = out.len();
        for k in &self.kidoku {
            out.extend_from_slice(&k.to_le_bytes());
        }

        let dramatis_offset = out.len();
        for name in &self.dramatis {
            out.extend_from_slice(&(name.len() as i32 + 1).to_le_bytes());
            out.extend_from_slice(name);
            out.push(0);
        }
        let dramatis_size = out.len() - dramatis_offset;

        if let Some((id, encoding)) = &self.metadata {
            let id_len = id.len() + 1;
            let meta_len = id_len + 20;
            out.extend_from_slice(&(meta_len as i32).to_le_bytes());
            out.extend_from_slice(&(id.len() as i32).to_le_bytes());
            out.extend_from_slice(id);
            out.push(0);
            out.extend_from_slice(&[0; 8]);
            out.push(*encoding);
            out.extend_from_slice(&[0; 3]);
        }

        let data_offset = out.len();
        let mut payload = vec![0u8; 8];
        payload.extend(literal_stream(&self.body));
        let compressed_len = payload.len();
        payload[0..4].copy_from_slice(&(compressed_len as i32).to_le_bytes());
        payload[4..8].copy_from_slice(&(self.body.len() as i32).to_le_bytes());
        if let Some(key) = self.key {
            key.apply(&mut payload);
        }
        apply_base_mask(&mut payload);
        out.extend(payload);

        let fields: [(usize, i32); 11] = [
            (0x00, HEADER_SIZE as i32),
            (0x04, self.version),
            (0x08, kidoku_offset as i32),
            (0x0c, self.kidoku.len() as i32),
            (0x14, dramatis_offset as i32),
            (0x18, self.dramatis.len() as i32),
            (0x1c, dramatis_size as i32),
            (0x20, data_offset as i32),
            (0x24, self.body.len() as i32),
            (0x28, compressed_len as i32),
            (0x1c4, self.savepoints[0]),
        ];
        for (at, v) in fields {
            out[at..at + 4].copy_from_slice(&v.to_le_bytes());
        }
        out[0x1c8..0x1cc].copy_from_slice(&self.savepoints[1].to_le_bytes());
        out[0x1cc..0x1d0].copy_from_slice(&self.savepoints[2].to_le_bytes());
        out
    }
}

/// Encodes `body` as literal-only groups.
pub fn literal_stream(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + body.len() / 8 + 1);
    for chunk in body.chunks(8) {
        out.push(((1u16 << chunk.len()) - 1) as u8);
        out.extend_from_slice(chunk);
    }
    out
}

/// Lays scenario images out behind a table of contents.
pub fn build_container(scenarios: &[(u16, Vec<u8>)]) -> Vec<u8> {
    let mut out = vec![0u8; 10000 * 8];
    for (number, data) in scenarios {
        let offset = out.len();
        let slot = *number as usize * 8;
        out[slot..slot + 4].copy_from_slice(&(offset as i32).to_le_bytes());
        out[slot + 4..slot + 8].copy_from_slice(&(data.len() as i32).to_le_bytes());
        out.extend_from_slice(data);
    }
    out
}
