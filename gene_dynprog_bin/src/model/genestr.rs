use crate::model::{Error, Result};

/// Nucleotide sequence the positions refer to.
#[derive(Clone, Debug, Default)]
pub struct GeneString {
    bases: Vec<u8>,
    stop_codons: Vec<bool>,
}

impl GeneString {
    pub fn new(bases: &[u8]) -> GeneString {
        let bases = bases.to_vec();
        let stop_codons = precompute_stop_codons(&bases);
        GeneString { bases, stop_codons }
    }

    pub fn len(&self) -> usize { self.bases.len() }

    pub fn is_empty(&self) -> bool { self.bases.is_empty() }

    pub fn get_bases(&self) -> &[u8] { &self.bases }

    pub fn get_stop_codons(&self) -> &[bool] { &self.stop_codons }

    /// k-mer index of the word starting at each position, 2 bits per base, first base highest.
    /// Positions too close to the end to start a full word hold 0.
    pub fn create_word_string(&self, degree: usize) -> Result<Vec<u16>> {
        if degree == 0 || degree > 8 {
            return Err(Error::InvalidValue(format!("Word degree {} outside 1..=8", degree)));
        }

        let codes = self
            .bases
            .iter()
            .enumerate()
            .map(|(i, &b)| {
                base_code(b).ok_or_else(|| {
                    Error::InvalidValue(format!("Unexpected base '{}' at position {}", b as char, i))
                })
            })
            .collect::<Result<Vec<u16>>>()?;

        let mut words = vec![0u16; codes.len()];
        if codes.len() < degree {
            return Ok(words);
        }

        for i in 0..=(codes.len() - degree) {
            words[i] = codes[i..i + degree].iter().fold(0u16, |acc, &c| (acc << 2) | c);
        }

        Ok(words)
    }
}

fn base_code(base: u8) -> Option<u16> {
    match base {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// True where a TAA, TAG or TGA codon starts.
pub fn precompute_stop_codons(bases: &[u8]) -> Vec<bool> {
    let mut stops = vec![false; bases.len()];
    if bases.len() < 3 {
        return stops;
    }

    for i in 0..bases.len() - 2 {
        let codon = [
            bases[i].to_ascii_uppercase(),
            bases[i + 1].to_ascii_uppercase(),
            bases[i + 2].to_ascii_uppercase(),
        ];
        stops[i] = matches!(&codon, b"TAA" | b"TAG" | b"TGA");
    }

    stops
}
