use crate::model::{ContentModel, TilingTrack, NUM_WORD_CLASSES};
use ndarray::Array2;

const VERIFY_TOLERANCE: f64 = 1e-9;

/// Inputs of the content features for one sequence: the word model with its per-degree word
/// strings, and the tiling tracks. Feature layout is `[svm channels.., tiling channels..]`.
#[derive(Clone, Copy)]
pub struct ContentSource<'a>
{
    pub model: Option<&'a ContentModel>,
    pub word_strings: &'a [Vec<u16>],
    pub tracks: &'a [TilingTrack],
}

impl<'a> ContentSource<'a>
{
    pub fn new(model: Option<&'a ContentModel>, word_strings: &'a [Vec<u16>], tracks: &'a [TilingTrack]) -> ContentSource<'a>
    {
        ContentSource { model, word_strings, tracks }
    }

    pub fn get_num_svms(&self) -> usize { self.model.map_or(0, |m| m.get_num_svms()) }

    pub fn get_num_features(&self) -> usize { self.get_num_svms() + self.tracks.len() }

    fn words_available(&self) -> bool
    {
        match self.model {
            Some(model) => self.word_strings.len() == model.get_num_degrees(),
            None => false,
        }
    }

    /// Feature vector of the window `[from, to)` computed from scratch. Framed SVMs count words
    /// by their residue relative to `origin`.
    pub fn compute_window(&self, from: i64, to: i64, origin: i64) -> Vec<f64>
    {
        let mut features = vec![0.0; self.get_num_features()];
        let start = from.max(0);

        if let (Some(model), true) = (self.model, self.words_available())
            {
            let num_svms = model.get_num_svms();
            for (j, &degree) in model.get_word_degrees().iter().enumerate()
                {
                let words = &self.word_strings[j];
                let mut used = vec![vec![false; model.get_num_words(j)]; NUM_WORD_CLASSES];
                let mut unique = [0usize; NUM_WORD_CLASSES];
                let mut total = [0usize; NUM_WORD_CLASSES];
                let mut unnormalized = vec![0.0; num_svms];

                let mut i = start;
                while i + degree as i64 <= to && ((i as usize) + degree) <= words.len()
                    {
                    let word = words[i as usize];
                    let residue = residue_class(i, origin);
                    let mut first = [false; NUM_WORD_CLASSES];
                    for &c in [0, residue].iter()
                        {
                        first[c] = !used[c][word as usize];
                        if first[c]
                            {
                            used[c][word as usize] = true;
                            unique[c] += 1;
                            }
                        total[c] += 1;
                        }

                    for (s, u) in unnormalized.iter_mut().enumerate()
                        {
                        let c = model.word_class(s);
                        if (c == 0 || c == residue) && (first[c] || !model.is_sign_word(s))
                            { *u += model.weight(j, word, s); }
                        }
                    i += 1;
                    }

                for s in 0..num_svms
                    {
                    let c = model.word_class(s);
                    features[s] += normalize(model.is_sign_word(s), unnormalized[s], unique[c], total[c]);
                    }
                }
            }

        let offset = self.get_num_svms();
        for (r, track) in self.tracks.iter().enumerate()
            { features[offset + r] = track.window_sum(from, to); }

        features
    }
}

/// Counting class of the word starting at `position` for framed SVMs.
#[inline]
fn residue_class(position: i64, origin: i64) -> usize
{
    1 + (position - origin).rem_euclid(3) as usize
}

#[inline]
fn normalize(sign_word: bool, unnormalized: f64, unique: usize, total: usize) -> f64
{
    if sign_word
        {
        if unique > 0 { unnormalized / (unique as f64).sqrt() } else { 0.0 }
        }
    else
        {
        if total > 0 { unnormalized / total as f64 } else { 0.0 }
        }
}

/// Content features of windows `[target, anchor)` for a fixed anchor and decreasing targets.
///
/// Each degree keeps a word-seen set and counts per counting class, all advanced by one shared
/// cursor. Words are only counted when they end at or before the anchor. Residue classes are
/// only tracked when the model has framed SVMs.
pub struct ContentFeatureCache<'a>
{
    source: ContentSource<'a>,
    anchor: i64,
    origin: i64,
    last_position: i64,
    framed: bool,
    word_used: Vec<Vec<Vec<bool>>>,
    touched: Vec<Vec<Vec<u16>>>,
    unique_words: Array2<usize>,
    total_words: Array2<usize>,
    unnormalized: Array2<f64>,
    track_next: Vec<usize>,
    track_sum: Vec<f64>,
    features: Vec<f64>,
    verify: bool,
}

impl<'a> ContentFeatureCache<'a>
{
    pub fn new(source: ContentSource<'a>) -> ContentFeatureCache<'a>
    {
        let (num_degrees, num_svms, framed) = match source.model {
            Some(model) => (model.get_num_degrees(), model.get_num_svms(), model.has_framed_words()),
            None => (0, 0, false),
        };
        let num_classes = if framed { NUM_WORD_CLASSES } else { 1 };

        let word_used = match source.model {
            Some(model) => (0..num_degrees)
                .map(|j| vec![vec![false; model.get_num_words(j)]; num_classes])
                .collect(),
            None => Vec::new(),
        };

        ContentFeatureCache {
            source,
            anchor: 0,
            origin: 0,
            last_position: 0,
            framed,
            word_used,
            touched: vec![vec![Vec::new(); num_classes]; num_degrees],
            unique_words: Array2::zeros((num_degrees, NUM_WORD_CLASSES)),
            total_words: Array2::zeros((num_degrees, NUM_WORD_CLASSES)),
            unnormalized: Array2::zeros((num_degrees, num_svms)),
            track_next: vec![0; source.tracks.len()],
            track_sum: vec![0.0; source.tracks.len()],
            features: vec![0.0; source.get_num_features()],
            verify: false,
        }
    }

    /// Compare every extension against `ContentSource::compute_window`.
    pub fn with_verification(mut self, verify: bool) -> ContentFeatureCache<'a>
    {
        self.verify = verify;
        self
    }

    pub fn get_anchor(&self) -> i64 { self.anchor }

    pub fn get_origin(&self) -> i64 { self.origin }

    pub fn get_last_position(&self) -> i64 { self.last_position }

    pub fn get_features(&self) -> &[f64] { &self.features }

    /// Start a new anchor. `origin` is a codon boundary of the reading frame, 0 for the global frame.
    pub fn reset(&mut self, anchor: i64, origin: i64)
    {
        for (used, touched) in self.word_used.iter_mut().zip(self.touched.iter_mut())
            {
            for (used, touched) in used.iter_mut().zip(touched.iter_mut())
                {
                for &w in touched.iter()
                    { used[w as usize] = false; }
                touched.clear();
                }
            }

        self.unique_words.fill(0);
        self.total_words.fill(0);
        self.unnormalized.fill(0.0);

        for (r, track) in self.source.tracks.iter().enumerate()
            {
            self.track_next[r] = track.first_probe_from(anchor);
            self.track_sum[r] = 0.0;
            }

        for f in self.features.iter_mut() { *f = 0.0; }

        self.anchor = anchor;
        self.origin = origin;
        self.last_position = anchor;
    }

    /// Features of `[target, anchor)`. Targets must not increase between resets; a larger
    /// target than the last one restarts the scan from the anchor.
    pub fn extend(&mut self, target: i64) -> &[f64]
    {
        debug_assert!(target <= self.last_position, "content cache moved forward: {} > {}", target, self.last_position);
        if target > self.last_position
            {
            let (anchor, origin) = (self.anchor, self.origin);
            self.reset(anchor, origin);
            }

        self.extend_words(target);
        self.extend_tracks(target);
        self.last_position = target;
        self.update_features();

        if self.verify
            {
            let expected = self.source.compute_window(target, self.anchor, self.origin);
            for (f, e) in self.features.iter().zip(expected.iter())
                {
                assert!((f - e).abs() <= VERIFY_TOLERANCE * (1.0 + e.abs()),
                        "content cache mismatch at [{}, {}): {} vs {}", target, self.anchor, f, e);
                }
            }

        &self.features
    }

    /// Count `word` in class `c`, returning whether it was new there.
    #[inline]
    fn count_word(&mut self, j: usize, c: usize, word: u16) -> bool
    {
        let first = !self.word_used[j][c][word as usize];
        if first
            {
            self.word_used[j][c][word as usize] = true;
            self.touched[j][c].push(word);
            self.unique_words[[j, c]] += 1;
            }
        self.total_words[[j, c]] += 1;
        first
    }

    fn extend_words(&mut self, target: i64)
    {
        let model = match (self.source.model, self.source.words_available()) {
            (Some(model), true) => model,
            _ => return,
        };

        let stop = target.max(0);
        let num_svms = model.get_num_svms();
        let word_strings: &'a [Vec<u16>] = self.source.word_strings;

        for (j, &degree) in model.get_word_degrees().iter().enumerate()
            {
            let words = &word_strings[j];
            let mut i = self.last_position - 1;

            while i >= stop
                {
                if i + degree as i64 <= self.anchor && (i as usize) + degree <= words.len()
                    {
                    let word = words[i as usize];
                    let mut first = [false; NUM_WORD_CLASSES];
                    first[0] = self.count_word(j, 0, word);

                    let residue = if self.framed { residue_class(i, self.origin) } else { 0 };
                    if residue != 0
                        { first[residue] = self.count_word(j, residue, word); }

                    for s in 0..num_svms
                        {
                        let c = model.word_class(s);
                        if (c == 0 || c == residue) && (first[c] || !model.is_sign_word(s))
                            { self.unnormalized[[j, s]] += model.weight(j, word, s); }
                        }
                    }
                i -= 1;
                }
            }
    }

    fn extend_tracks(&mut self, target: i64)
    {
        for (r, track) in self.source.tracks.iter().enumerate()
            {
            let probe_pos = track.get_probe_pos();
            let intensities = track.get_intensities();

            while self.track_next[r] > 0 && probe_pos[self.track_next[r] - 1] >= target
                {
                self.track_next[r] -= 1;
                self.track_sum[r] += intensities[self.track_next[r]];
                }
            }
    }

    fn update_features(&mut self)
    {
        let num_svms = self.source.get_num_svms();
        let unnormalized = &self.unnormalized;
        let unique_words = &self.unique_words;
        let total_words = &self.total_words;
        let features = &mut self.features;

        if let Some(model) = self.source.model
            {
            for s in 0..num_svms
                {
                let sign_word = model.is_sign_word(s);
                let c = model.word_class(s);
                features[s] = (0..unique_words.nrows())
                    .map(|j| normalize(sign_word, unnormalized[[j, s]], unique_words[[j, c]], total_words[[j, c]]))
                    .sum();
                }
            }

        for (r, sum) in self.track_sum.iter().enumerate()
            { features[num_svms + r] = *sum; }
    }
}
