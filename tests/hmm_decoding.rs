mod common;

use std::path::Path;
use std::sync::Arc;

use asmc::config::with_suffix;
use asmc::data::panel::PanelOptions;
use asmc::io::sums::read_table;
use asmc::{AsmcError, AsmcPipeline, Data, DecodingParams, DecodingQuantities, Hmm, PairShard};
use common::PanelBuilder;

// --- Helpers ---

fn params(root: &Path) -> DecodingParams {
    let mut params = DecodingParams::new(root);
    params.do_posterior_sums = true;
    params.process_options().unwrap();
    params
}

fn load(root: &Path, params: &DecodingParams) -> (Arc<Data>, Arc<DecodingQuantities>) {
    let dq = Arc::new(DecodingQuantities::load(&params.quantities_path()).unwrap());
    let sites = Data::count_hap_lines(root).unwrap();
    let options = PanelOptions::from_params(params, dq.csfs_samples());
    (Arc::new(Data::load(root, sites, &options).unwrap()), dq)
}

fn assert_tables_close(a: &ndarray::Array2<f64>, b: &ndarray::Array2<f64>, tol: f64) {
    assert_eq!(a.dim(), b.dim());
    for (x, y) in a.iter().zip(b.iter()) {
        assert!((x - y).abs() <= tol * (1.0 + x.abs()), "{} vs {}", x, y);
    }
}

// --- Tests ---

#[test]
fn test_loaded_panel_matches_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = PanelBuilder::new(5, 120).build(dir.path());
    let params = params(&root);
    let (data, dq) = load(&root, &params);

    assert_eq!(data.sites(), 120);
    assert_eq!(data.n_individuals(), 5);
    assert_eq!(data.n_haps(), 10);
    assert_eq!(dq.states(), 8);
    assert_eq!(data.site_map()[3].bp, common::bp(3));
    let d = data.genetic_positions()[10] - data.genetic_positions()[9];
    assert!((d - 1e-4).abs() < 1e-9);
}

#[test]
fn test_sharded_sums_add_up_to_unsharded() {
    let dir = tempfile::tempdir().unwrap();
    let root = PanelBuilder::new(6, 150).seed(3).build(dir.path());
    let mut params = params(&root);
    params.do_major_minor_posterior_sums = true;
    let (data, dq) = load(&root, &params);

    let mut full = Hmm::new(Arc::clone(&data), Arc::clone(&dq), &params).unwrap();
    full.decode_all(1, 1).unwrap();
    let full = full.decoding_return_values().clone();
    // 6 within pairs + 15 * 4 cross pairs
    assert_eq!(full.pairs_decoded, 66);

    let mut merged: Option<asmc::DecodingReturnValues> = None;
    for job in 1..=4 {
        let mut hmm = Hmm::new(Arc::clone(&data), Arc::clone(&dq), &params).unwrap();
        hmm.decode_all(4, job).unwrap();
        let values = hmm.decoding_return_values().clone();
        match merged.as_mut() {
            Some(m) => m.merge(&values).unwrap(),
            None => merged = Some(values),
        }
    }
    let merged = merged.unwrap();
    assert_eq!(merged.pairs_decoded, full.pairs_decoded);
    assert_tables_close(&merged.sum_over_pairs, &full.sum_over_pairs, 1e-9);
    assert_tables_close(
        merged.sum_over_pairs_01.as_ref().unwrap(),
        full.sum_over_pairs_01.as_ref().unwrap(),
        1e-9,
    );
}

#[test]
fn test_pair_order_does_not_change_sums() {
    let dir = tempfile::tempdir().unwrap();
    let root = PanelBuilder::new(5, 100).seed(11).build(dir.path());
    let params = params(&root);
    let (data, dq) = load(&root, &params);

    let pairs: Vec<(usize, usize)> = PairShard::full()
        .pairs(5)
        .map(|(a, b)| (a.as_usize(), b.as_usize()))
        .collect();
    let (a, b): (Vec<usize>, Vec<usize>) = pairs.iter().copied().unzip();
    let (ra, rb): (Vec<usize>, Vec<usize>) = pairs.iter().rev().copied().unzip();

    let mut forward = Hmm::new(Arc::clone(&data), Arc::clone(&dq), &params).unwrap();
    forward.decode_pairs(&a, &b).unwrap();
    forward.finish_decoding().unwrap();

    let mut reversed = Hmm::new(Arc::clone(&data), Arc::clone(&dq), &params).unwrap();
    reversed.decode_pairs(&ra, &rb).unwrap();
    reversed.finish_decoding().unwrap();

    assert_tables_close(
        &forward.decoding_return_values().sum_over_pairs,
        &reversed.decoding_return_values().sum_over_pairs,
        1e-9,
    );
}

#[test]
fn test_compressed_emission_decodes() {
    let dir = tempfile::tempdir().unwrap();
    let root = PanelBuilder::new(3, 80).plain_text().build(dir.path());
    let mut params = DecodingParams::new(&root);
    params.compress = true;
    params.do_posterior_sums = true;
    params.process_options().unwrap();
    assert!(!params.using_csfs);
    assert_eq!(params.skip_csfs_distance, f32::INFINITY);

    let (data, dq) = load(&root, &params);
    let hmm = Hmm::new(data, dq, &params).unwrap();
    let obs = hmm.make_pair_obs(
        asmc::HapSlot::First,
        asmc::SampleIdx::new(0),
        asmc::HapSlot::Second,
        asmc::SampleIdx::new(2),
    );
    let posterior = hmm.decode(&obs).unwrap();
    assert_eq!(posterior.len(), 8);
    for site in 0..80 {
        let total: f32 = posterior.iter().map(|row| row[site]).sum();
        assert!((total - 1.0).abs() < 1e-4);
    }
}

#[test]
fn test_csfs_sample_mismatch_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let root = PanelBuilder::new(3, 50).build(dir.path());
    let params = params(&root);
    let (_, dq) = load(&root, &params);
    let sites = Data::count_hap_lines(&root).unwrap();
    let options = PanelOptions::from_params(&params, 6);
    let data = Arc::new(Data::load(&root, sites, &options).unwrap());

    let err = Hmm::new(data, dq, &params).err().unwrap();
    assert!(matches!(err, AsmcError::Config { .. }), "{}", err);
}

#[test]
fn test_pipeline_writes_sums_and_per_pair_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let root = PanelBuilder::new(4, 90).seed(5).build(dir.path());
    let mut params = DecodingParams::new(&root);
    params.do_posterior_sums = true;
    params.do_per_pair_posterior_mean = true;
    params.jobs = 2;
    params.job_ind = 2;
    params.process_options().unwrap();

    let values = AsmcPipeline::new(params.clone()).run().unwrap();
    assert!(values.pairs_decoded > 0);

    let out = params.out_root();
    assert_eq!(out, with_suffix(&root, ".2-2"));
    let sums = read_table(&with_suffix(&out, ".sumOverPairs.gz")).unwrap();
    assert_eq!(sums.len(), 90);
    for (site, row) in sums.iter().enumerate() {
        assert_eq!(row.len(), 8);
        let total: f64 = row.iter().sum();
        assert!(
            (total - values.pairs_decoded as f64).abs() < 1e-3 * values.pairs_decoded as f64,
            "site {} sums to {}",
            site,
            total
        );
    }

    let means = read_table_lines(&with_suffix(&out, ".perPairPosteriorMeans.gz"));
    assert_eq!(means.len() as u64, values.pairs_decoded);
    assert_eq!(means[0].split_whitespace().count(), 6 + 90);
    assert!(!with_suffix(&out, ".perPairMAP.gz").exists());
}

fn read_table_lines(path: &Path) -> Vec<String> {
    use std::io::BufRead;
    asmc::io::open_text(path)
        .unwrap()
        .lines()
        .map(|l| l.unwrap())
        .collect()
}
