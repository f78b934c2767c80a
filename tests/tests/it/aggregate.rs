#[generic_tests::define(attrs(test, test_case::case))]
mod generic {
    use blsftcosi::{
        signing::aggregate::{FinalAggregate, VerifyError},
        Mask, Policy, Scheme,
    };
    use rand::seq::SliceRandom;

    #[test_case::case(1; "n1")]
    #[test_case::case(2; "n2")]
    #[test_case::case(10; "n10")]
    #[test_case::case(24; "n24")]
    fn combine_is_order_independent<S: Scheme>(n: u16) {
        let mut rng = rand_dev::DevRng::new();
        let secret_keys = blsftcosi_tests::generate_keys::<S>(&mut rng, n);
        let public_keys = secret_keys.iter().map(S::public_key).collect::<Vec<_>>();
        let msg = blsftcosi_tests::random_msg(&mut rng);

        let shares = secret_keys
            .iter()
            .map(|sk| S::sign(sk, &msg))
            .collect::<Vec<_>>();
        for (pk, share) in public_keys.iter().zip(&shares) {
            S::verify_share(pk, &msg, share).unwrap();
        }

        let mut parts = shares.iter().map(Vec::as_slice).collect::<Vec<_>>();
        let aggregate = S::combine(&parts).unwrap();

        parts.shuffle(&mut rng);
        let shuffled = S::combine(&parts).unwrap();
        assert_eq!(aggregate, shuffled);

        // Combining partial aggregates yields the same result as combining shares
        let (left, right) = parts.split_at(parts.len() / 2);
        if !left.is_empty() {
            let left = S::combine(left).unwrap();
            let right = S::combine(right).unwrap();
            assert_eq!(
                S::combine(&[right.as_slice(), left.as_slice()]).unwrap(),
                aggregate
            );
        }

        let mut mask = Mask::new(n);
        (0..n).for_each(|i| mask.set(i).unwrap());
        S::verify_aggregate(&public_keys, &msg, &aggregate, &mask).unwrap();
    }

    #[test]
    fn aggregate_doesnt_verify_with_wrong_mask<S: Scheme>() {
        let mut rng = rand_dev::DevRng::new();
        let n = 6;
        let secret_keys = blsftcosi_tests::generate_keys::<S>(&mut rng, n);
        let public_keys = secret_keys.iter().map(S::public_key).collect::<Vec<_>>();
        let msg = blsftcosi_tests::random_msg(&mut rng);

        let shares = secret_keys
            .iter()
            .map(|sk| S::sign(sk, &msg))
            .collect::<Vec<_>>();
        let parts = shares.iter().map(Vec::as_slice).collect::<Vec<_>>();
        let aggregate = S::combine(&parts).unwrap();

        // Participant 3 is missing from the mask
        let mut mask = Mask::new(n);
        (0..n)
            .filter(|i| *i != 3)
            .for_each(|i| mask.set(i).unwrap());
        assert!(S::verify_aggregate(&public_keys, &msg, &aggregate, &mask).is_err());

        // Mask over a different number of participants
        let mut mask = Mask::new(n + 1);
        (0..n).for_each(|i| mask.set(i).unwrap());
        assert!(S::verify_aggregate(&public_keys, &msg, &aggregate, &mask).is_err());

        // Empty mask
        assert!(S::verify_aggregate(&public_keys, &msg, &aggregate, &Mask::new(n)).is_err());

        // Share doesn't verify under another participant's key
        assert!(S::verify_share(&public_keys[1], &msg, &shares[0]).is_err());
        // Share doesn't verify for another message
        assert!(S::verify_share(&public_keys[0], b"another message", &shares[0]).is_err());
        // Garbage is never accepted
        assert!(S::verify_share(&public_keys[0], &msg, &[0u8; 7]).is_err());
        assert!(S::combine(&[]).is_err());
    }

    #[test]
    fn encoded_aggregate<S: Scheme>() {
        let mut rng = rand_dev::DevRng::new();
        let n = 10;
        let secret_keys = blsftcosi_tests::generate_keys::<S>(&mut rng, n);
        let public_keys = secret_keys.iter().map(S::public_key).collect::<Vec<_>>();
        let msg = blsftcosi_tests::random_msg(&mut rng);

        let signers = [0, 2, 3, 5, 8, 9];
        let shares = signers
            .iter()
            .map(|&i| S::sign(&secret_keys[usize::from(i)], &msg))
            .collect::<Vec<_>>();
        let signature =
            S::combine(&shares.iter().map(Vec::as_slice).collect::<Vec<_>>()).unwrap();
        let mut mask = Mask::new(n);
        signers.iter().for_each(|&i| mask.set(i).unwrap());

        let bytes = [signature.as_slice(), mask.as_bytes()].concat();
        assert_eq!(bytes.len(), S::SIGNATURE_SIZE + 2);

        let aggregate = FinalAggregate::from_bytes::<S>(n, &bytes).unwrap();
        assert_eq!(aggregate.participants(), 6);
        assert_eq!(aggregate.to_bytes(), bytes);

        blsftcosi::verify::<S>(&public_keys, &msg, &bytes, Policy::Threshold(6)).unwrap();

        let err = blsftcosi::verify::<S>(&public_keys, &msg, &bytes, Policy::Threshold(7))
            .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::PolicyNotSatisfied {
                participating: 6,
                total: 10,
                ..
            }
        ));
        let err =
            blsftcosi::verify::<S>(&public_keys, &msg, &bytes, Policy::Complete).unwrap_err();
        assert!(matches!(err, VerifyError::PolicyNotSatisfied { .. }));

        let err = blsftcosi::verify::<S>(&public_keys, b"another message", &bytes, Policy::Complete)
            .unwrap_err();
        assert!(matches!(err, VerifyError::InvalidSignature(_)));

        // Signature claims participation of someone who didn't sign
        let mut forged = bytes.clone();
        forged[S::SIGNATURE_SIZE] |= 0b10;
        let err = blsftcosi::verify::<S>(&public_keys, &msg, &forged, Policy::Threshold(6))
            .unwrap_err();
        assert!(matches!(err, VerifyError::InvalidSignature(_)));

        // Bits beyond the number of participants must not be set
        let mut forged = bytes.clone();
        forged[S::SIGNATURE_SIZE + 1] |= 0b1000_0000;
        let err = blsftcosi::verify::<S>(&public_keys, &msg, &forged, Policy::Threshold(6))
            .unwrap_err();
        assert!(matches!(err, VerifyError::Malformed(_)));

        let err = blsftcosi::verify::<S>(
            &public_keys,
            &msg,
            &bytes[..bytes.len() - 1],
            Policy::Threshold(6),
        )
        .unwrap_err();
        assert!(matches!(err, VerifyError::Malformed(_)));

        let err = blsftcosi::verify::<S>(&public_keys[..9], &msg, &bytes, Policy::Threshold(6))
            .unwrap_err();
        assert!(matches!(err, VerifyError::Malformed(_)));
    }

    #[test]
    fn public_key_encoding<S: Scheme>() {
        let mut rng = rand_dev::DevRng::new();
        let secret_key = S::generate_secret_key(&mut rng).unwrap();
        let public_key = S::public_key(&secret_key);

        let bytes = S::serialize_public_key(&public_key);
        assert_eq!(S::deserialize_public_key(&bytes).unwrap(), public_key);
        assert!(S::deserialize_public_key(&bytes[1..]).is_err());
        assert!(S::deserialize_public_key(&vec![0u8; bytes.len()]).is_err());
    }

    #[instantiate_tests(<blsftcosi::scheme::Bls12381MinPk>)]
    mod bls12381_min_pk {}
    #[instantiate_tests(<blsftcosi::scheme::Bls12381MinSig>)]
    mod bls12381_min_sig {}
}
