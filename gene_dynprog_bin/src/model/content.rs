use crate::model::{Error, Result};
use ndarray::Array2;

pub const DEFAULT_WORD_DEGREES: [usize; 4] = [3, 4, 5, 6];

/// Word counting classes: class 0 sees every word, class `1 + r` only words in codon residue `r`.
pub const NUM_WORD_CLASSES: usize = 4;

/// k-mer content model: word degrees, per-SVM counting mode and the dictionary weights.
#[derive(Clone, Debug)]
pub struct ContentModel {
    word_degrees: Vec<usize>,
    num_words: Vec<usize>,
    cum_num_words: Vec<usize>,
    num_svms: usize,
    sign_words: Vec<bool>,
    mod_words: Vec<(usize, usize)>,
    dict_weights: Array2<f64>,
}

impl ContentModel {
    /// All SVMs count each distinct word once until `with_sign_words` says otherwise.
    pub fn new(word_degrees: &[usize], num_svms: usize) -> Result<ContentModel> {
        if word_degrees.is_empty() {
            return Err("Content model requires at least one word degree".into());
        }

        let mut num_words = Vec::with_capacity(word_degrees.len());
        let mut cum_num_words = vec![0];
        for &degree in word_degrees.iter() {
            if degree == 0 || degree > 8 {
                return Err(Error::InvalidValue(format!("Word degree {} outside 1..=8", degree)));
            }
            let words = 1usize << (2 * degree);
            num_words.push(words);
            cum_num_words.push(cum_num_words[cum_num_words.len() - 1] + words);
        }

        let total = cum_num_words[cum_num_words.len() - 1];

        Ok(ContentModel {
            word_degrees: word_degrees.to_vec(),
            num_words,
            cum_num_words,
            num_svms,
            sign_words: vec![true; num_svms],
            mod_words: vec![(1, 0); num_svms],
            dict_weights: Array2::zeros((total, num_svms)),
        })
    }

    /// `true` counts each distinct word once (normalised by the square root of the
    /// distinct count), `false` counts every occurrence (normalised by the occurrence count).
    pub fn with_sign_words(mut self, sign_words: Vec<bool>) -> Result<ContentModel> {
        if sign_words.len() != self.num_svms {
            return Err(Error::MismatchedDimensions("sign words", sign_words.len(), self.num_svms));
        }
        self.sign_words = sign_words;
        Ok(self)
    }

    /// Per-SVM `(modulus, offset)` word filter. Modulus 1 counts every word; modulus 3 counts
    /// only words starting at `offset` bases past a codon boundary of the segment's reading frame.
    pub fn with_mod_words(mut self, mod_words: Vec<(usize, usize)>) -> Result<ContentModel> {
        if mod_words.len() != self.num_svms {
            return Err(Error::MismatchedDimensions("mod words", mod_words.len(), self.num_svms));
        }
        for &(modulus, offset) in mod_words.iter() {
            if (modulus != 1 && modulus != 3) || offset >= modulus {
                return Err(Error::InvalidValue(format!("Unsupported mod word ({}, {})", modulus, offset)));
            }
        }
        self.mod_words = mod_words;
        Ok(self)
    }

    pub fn set_dict_weights(&mut self, dict_weights: Array2<f64>) -> Result<()> {
        let total = self.get_total_words();
        if dict_weights.nrows() != total {
            return Err(Error::MismatchedDimensions("dictionary weight rows", dict_weights.nrows(), total));
        }
        if dict_weights.ncols() != self.num_svms {
            return Err(Error::MismatchedDimensions("dictionary weight columns", dict_weights.ncols(), self.num_svms));
        }
        self.dict_weights = dict_weights;
        Ok(())
    }

    pub fn get_word_degrees(&self) -> &[usize] { &self.word_degrees }

    pub fn get_num_degrees(&self) -> usize { self.word_degrees.len() }

    pub fn get_num_words(&self, degree_idx: usize) -> usize { self.num_words[degree_idx] }

    pub fn get_total_words(&self) -> usize { self.cum_num_words[self.word_degrees.len()] }

    pub fn get_num_svms(&self) -> usize { self.num_svms }

    pub fn is_sign_word(&self, svm: usize) -> bool { self.sign_words[svm] }

    pub fn get_mod_words(&self) -> &[(usize, usize)] { &self.mod_words }

    /// Counting class of `svm`, see `NUM_WORD_CLASSES`.
    pub fn word_class(&self, svm: usize) -> usize {
        match self.mod_words[svm] {
            (3, offset) => 1 + offset,
            _ => 0,
        }
    }

    pub fn has_framed_words(&self) -> bool { self.mod_words.iter().any(|&(modulus, _)| modulus == 3) }

    #[inline]
    pub fn weight(&self, degree_idx: usize, word: u16, svm: usize) -> f64 {
        self.dict_weights[[self.cum_num_words[degree_idx] + word as usize, svm]]
    }
}

/// Probe positions and intensities of one raw tiling-array data source.
#[derive(Clone, Debug)]
pub struct TilingTrack {
    probe_pos: Vec<i64>,
    intensities: Vec<f64>,
}

impl TilingTrack {
    pub fn new(probe_pos: Vec<i64>, intensities: Vec<f64>) -> Result<TilingTrack> {
        if probe_pos.len() != intensities.len() {
            return Err(Error::MismatchedDimensions("tiling intensities", intensities.len(), probe_pos.len()));
        }
        if probe_pos.windows(2).any(|w| w[1] <= w[0]) {
            return Err("Tiling probe positions must be strictly increasing".into());
        }
        Ok(TilingTrack { probe_pos, intensities })
    }

    pub fn get_probe_pos(&self) -> &[i64] { &self.probe_pos }

    pub fn get_intensities(&self) -> &[f64] { &self.intensities }

    pub fn len(&self) -> usize { self.probe_pos.len() }

    pub fn is_empty(&self) -> bool { self.probe_pos.is_empty() }

    /// Index of the first probe at or after `position`.
    pub fn first_probe_from(&self, position: i64) -> usize {
        self.probe_pos.partition_point(|&p| p < position)
    }

    pub fn window_sum(&self, from: i64, to: i64) -> f64 {
        let start = self.first_probe_from(from);
        let end = self.first_probe_from(to);
        if end <= start {
            return 0.0;
        }
        self.intensities[start..end].iter().sum()
    }
}
