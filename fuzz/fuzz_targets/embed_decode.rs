#![no_main]

use bitcoin::script::PushBytesBuf;
use bitcoin::{Amount, ScriptBuf, TxOut};
use libfuzzer_sys::fuzz_target;
use satvault_script::DepositEmbedMsg;

fuzz_target!(|data: &[u8]| {
    // decode must return Ok or Err, never panic
    if let Ok(msg) = DepositEmbedMsg::decode(data) {
        let _ = msg.user_pubkey();
        // anything that decodes re-encodes
        assert!(msg.encode().is_ok());
    }

    // same payload behind an OP_RETURN output
    if let Ok(push) = PushBytesBuf::try_from(data.to_vec()) {
        let output = TxOut {
            value: Amount::ZERO,
            script_pubkey: ScriptBuf::new_op_return(push),
        };
        let _ = DepositEmbedMsg::from_output(&output);
    }
});
