use std::process::exit;
use gene_dynprog_bin::decoder::{DecodeConfig, DynProg, INFEASIBLE_EMISSION};
use gene_dynprog_bin::model::genestr::precompute_stop_codons;
use gene_dynprog_bin::model::{PenaltyFunction, Plif, Result, Transition};
use log::info;
use ndarray::{Array2, Array3};

const SEQ_START: usize = 0;
const TIS: usize = 1;
const STOP: usize = 2;
const SEQ_END: usize = 3;
const NUM_STATES: usize = 4;

/// Sequence ends, every ATG and every stop codon, with the states allowed at each.
fn candidate_positions(bases: &[u8]) -> (Vec<i64>, Vec<[bool; NUM_STATES]>)
{
    let stops = precompute_stop_codons(bases);
    let mut positions = Vec::new();
    let mut allowed = Vec::new();

    for pos in 0..=bases.len()
        {
        let mut states = [false; NUM_STATES];
        states[SEQ_START] = pos == 0;
        states[SEQ_END] = pos == bases.len();
        states[TIS] = bases.get(pos..pos + 3) == Some(&b"ATG"[..]);
        states[STOP] = stops.get(pos).copied().unwrap_or(false);

        if states.iter().any(|&s| s)
            {
            positions.push(pos as i64);
            allowed.push(states);
            }
        }

    (positions, allowed)
}

fn build_model(bases: &[u8]) -> Result<DynProg>
{
    let (positions, allowed) = candidate_positions(bases);
    let seq_len = positions.len();

    let mut dp = DynProg::new(NUM_STATES);
    dp.set_p_vector(vec![0.0, f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY])?;
    dp.set_q_vector(vec![f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY, 0.0])?;
    dp.set_a_trans(&[
        Transition::new(SEQ_START, TIS, -1.0),
        Transition::new(SEQ_START, SEQ_END, 0.0),
        Transition::new(TIS, STOP, 0.0).with_segment_id(1),
        Transition::new(STOP, TIS, -1.0),
        Transition::new(STOP, SEQ_END, 0.0),
    ])?;

    let observations = Array3::from_shape_fn((NUM_STATES, seq_len, 1), |(state, t, _)| {
        if allowed[t][state] { 0.0 } else { INFEASIBLE_EMISSION }
    });
    dp.set_observations(observations)?;
    dp.set_positions(positions)?;

    let mut orf_info = Array2::from_elem((NUM_STATES, 2), -1);
    orf_info[[TIS, 0]] = 0;
    orf_info[[STOP, 1]] = 0;
    dp.set_orf_info(orf_info.view())?;

    let coding_length = Plif::new(vec![6.0, 90.0, 300.0, 3000.0], vec![-3.0, 0.0, 2.0, 4.0])?
        .with_name("coding_length")
        .with_range(6.0, 3000.0)?
        .with_cache();
    let plifs: Vec<Box<dyn PenaltyFunction>> = vec![Box::new(coding_length)];
    dp.set_plif_list(plifs)?;

    let mut plif_ids = Array2::from_elem((NUM_STATES, NUM_STATES), None);
    plif_ids[[STOP, TIS]] = Some(0);
    dp.set_plif_id_matrix(plif_ids)?;
    dp.set_plif_state_signal_matrix(Array2::from_elem((NUM_STATES, 1), None))?;

    dp.set_genestr(bases)?;
    dp.set_dict_weights(Array2::zeros((0, 0)))?;

    Ok(dp)
}

fn run(bases: &[u8], nbest: usize) -> Result<()>
{
    let mut dp = build_model(bases)?;
    info!("{} candidate positions in {}bp", dp.get_seq_len(), bases.len());

    dp.decode_with(DecodeConfig::new(nbest).with_orf(true))?;
    let scores = dp.get_scores()?;

    for (rank, score) in scores.iter().enumerate()
        {
        let path = dp.get_state_path(rank)?;
        if path.is_empty()
            {
            println!("#{}: no path", rank + 1);
            continue;
            }

        let positions = dp.get_coordinates(&path);
        let genes: Vec<String> = path
            .get_steps()
            .windows(2)
            .zip(positions.windows(2))
            .filter(|(steps, _)| steps[0].state == TIS && steps[1].state == STOP)
            .map(|(_, pos)| format!("{}..{}", pos[0], pos[1] + 3))
            .collect();

        if genes.is_empty()
            { println!("#{}: score {:.3}, no genes", rank + 1, score); }
        else
            { println!("#{}: score {:.3}, genes {}", rank + 1, score, genes.join(" ")); }
        }

    Ok(())
}

fn main()
{
    env_logger::init();

    let arg_vec = std::env::args().collect::<Vec<_>>();

    if arg_vec.len() != 3
    {
        println!("gene_dynprog <dna> <nbest>");
        exit(1);
    }

    let bases = arg_vec[1].to_ascii_uppercase().into_bytes();
    let nbest = match arg_vec[2].parse::<usize>() {
        Ok(nbest) => nbest,
        Err(e) => {
            println!("Invalid nbest '{}': {}", arg_vec[2], e);
            exit(1);
        }
    };

    if let Err(e) = run(&bases, nbest)
    {
        println!("Decoding failed: {}", e);
        exit(1);
    }
}
