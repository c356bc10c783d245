use acta_core::batch::{ATTENTION_MASK, mask_from_labels};
use acta_core::{
    Batch, Encoder, ModelInputs, Reduction, SequenceTagger, TaggerConfig, TaggerOutput,
    TaggingMode,
};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Embedding, VarBuilder, VarMap, embedding};

struct LookupEncoder {
    embeddings: Embedding,
}

impl Encoder for LookupEncoder {
    fn hidden_size(&self) -> usize {
        6
    }

    fn forward(&self, inputs: &ModelInputs<'_>) -> acta_core::Result<Tensor> {
        Ok(self.embeddings.forward(inputs.input_ids)?)
    }
}

fn build_tagger(mode: TaggingMode) -> SequenceTagger {
    let dev = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
    let encoder = LookupEncoder {
        embeddings: embedding(32, 6, vb.pp("embeddings")).unwrap(),
    };
    let config = TaggerConfig::new("lookup", ["O", "Premise", "PAD"])
        .with_mode(mode)
        .with_masked_label_id(Some(2));
    SequenceTagger::with_encoder(&config, Box::new(encoder), varmap, &dev).unwrap()
}

fn build_batch() -> Batch {
    let dev = Device::Cpu;
    let ids = Tensor::new(&[[11u32, 4, 27, 0, 0], [8, 19, 0, 0, 0]], &dev).unwrap();
    let attention = Tensor::new(&[[1u32, 1, 1, 0, 0], [1, 1, 0, 0, 0]], &dev).unwrap();
    let labels = Tensor::new(&[[0i64, 1, 1, 2, 2], [1, 0, 2, 2, 2]], &dev).unwrap();
    Batch::new(ids)
        .with_input(ATTENTION_MASK, attention)
        .with_labels(labels)
}

#[test]
fn mask_is_derived_from_trailing_pad_labels() {
    let batch = build_batch();
    let mask = mask_from_labels(batch.labels().unwrap(), 2).unwrap();
    assert_eq!(
        mask.to_vec2::<u8>().unwrap(),
        vec![vec![1, 1, 1, 0, 0], vec![1, 1, 0, 0, 0]]
    );
}

#[test]
fn structured_modes_decode_five_labels_with_pad_fill() {
    let batch = build_batch();
    for mode in [TaggingMode::RecurrentCrf, TaggingMode::ProjectionCrf] {
        let tagger = build_tagger(mode);
        let inputs = batch.model_inputs().unwrap();
        let output = tagger.forward(&inputs, batch.labels()).unwrap();
        let TaggerOutput::Decoded { path, emissions } = &output else {
            panic!("{mode:?} should decode");
        };
        assert_eq!(path.dims(), &[2, 5]);
        assert_eq!(emissions.dims(), &[2, 5, 3]);

        let paths = output.predictions().unwrap();
        assert!(paths.iter().all(|row| row.len() == 5 && row.iter().all(|&id| id < 3)));
        assert_eq!(&paths[0][3..], &[2, 2]);
        assert_eq!(&paths[1][2..], &[2, 2, 2]);

        // Unmasked positions agree with decoding the truncated sequences.
        let crf = tagger.crf().unwrap();
        for (row, len) in [(0usize, 3usize), (1, 2)] {
            let truncated = emissions
                .narrow(0, row, 1)
                .unwrap()
                .narrow(1, 0, len)
                .unwrap()
                .contiguous()
                .unwrap();
            let expected = crf.decode(&truncated, None, 0).unwrap();
            assert_eq!(&paths[row][..len], expected[0].as_slice(), "{mode:?} row {row}");
        }
    }
}

#[test]
fn masked_loss_matches_crf_nll() {
    let batch = build_batch();
    let tagger = build_tagger(TaggingMode::ProjectionCrf);
    let inputs = batch.model_inputs().unwrap();
    let emissions = tagger.emissions(&inputs).unwrap();
    let mask = tagger.label_mask(batch.labels()).unwrap();

    let expected = tagger
        .crf()
        .unwrap()
        .neg_log_likelihood(&emissions, batch.labels().unwrap(), mask.as_ref(), Reduction::Sum)
        .unwrap()
        .to_scalar::<f32>()
        .unwrap();
    let loss = tagger.loss(&batch).unwrap().to_scalar::<f32>().unwrap();
    assert!((loss - expected).abs() < 1e-5);
}

#[test]
fn prediction_step_is_serializable_for_every_mode() {
    let batch = build_batch();
    for mode in [
        TaggingMode::Direct,
        TaggingMode::RecurrentCrf,
        TaggingMode::ProjectionCrf,
    ] {
        let tagger = build_tagger(mode);
        let output = tagger.predict_step(&batch, 0, None).unwrap();
        assert_eq!(output.input_ids[0], vec![11, 4, 27, 0, 0]);
        assert!(output.predictions.iter().all(|row| row.len() == 5));

        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["labels"][1], serde_json::json!([1, 0, 2, 2, 2]));
        assert_eq!(json["predictions"].as_array().unwrap().len(), 2);

        let names = output.prediction_labels(tagger.labels()).unwrap();
        assert!(names[0].iter().all(|name| ["O", "Premise", "PAD"].contains(name)));
    }
}
