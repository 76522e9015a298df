use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

const PAIRS: &[(&str, &str, &str)] = &[
    ("Do not touch the cable.", "Berühren Sie das Kabel nicht.", ""),
    ("Take 2 tablets twice a day.", "Nehmen Sie zweimal täglich 2 Tabletten.", "NUM"),
    ("The train to Berlin leaves at 9.", "Der Zug nach Berlin fährt um 9 Uhr ab.", ""),
    ("The museum opens on Monday.", "Das Museum öffnet am Montag.", "NOT"),
    ("You must always wear gloves.", "Sie müssen unbedingt Handschuhe tragen.", "SAF"),
    ("Turn left at the church.", "Biegen Sie an der Kirche links ab.", ""),
    ("The shop is not open on Sunday.", "Das Geschäft ist am Sonntag nicht geöffnet.", "ERR"),
    ("Keep at least 2 metres apart.", "Halten Sie mindestens 2 Meter Abstand.", ""),
    ("Our office in Paris is closed.", "Unser Büro in Paris ist geschlossen.", ""),
    ("The water here is safe to drink.", "Das Wasser hier ist sicher zu trinken.", ""),
    ("Never leave children alone near the pool.", "Lassen Sie Kinder nie allein am Pool.", "SEN"),
    ("The meeting starts at 14:30.", "Die Besprechung beginnt um 14:30 Uhr.", ""),
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = PathBuf::from(
        std::env::args()
            .nth(1)
            .unwrap_or_else(|| "/tmp/synced_sample".to_string()),
    );
    fs::create_dir_all(&dir)?;

    println!("Generating sample data in {}\n", dir.display());

    let mut input = BufWriter::new(File::create(dir.join("input.tsv"))?);
    writeln!(input, "rid\tsrc_en\tmt_de\ttarget_err")?;
    for (i, (src, mt, target)) in PAIRS.iter().enumerate() {
        writeln!(input, "s{:03}\t{}\t{}\t{}", i + 1, src, mt, target)?;
    }
    // a training row that repeats the frozen eval pair below
    writeln!(input, "s900\tPlease close the door.\tBitte schließen Sie die Tür.\t")?;
    input.flush()?;

    let mut eval = BufWriter::new(File::create(dir.join("eval_gold.tsv"))?);
    writeln!(
        eval,
        "rid\tsrc_en\tmt_de\ttarget_err\tmulticlass_label\terror_obviousness\terror_severity\tlocalization_complexity\tcontextual_dependency\tadequacy_deviation\tschema_version"
    )?;
    writeln!(
        eval,
        "e001\tPlease close the door.\tBitte schließen Sie die Tür.\tNOT\tNOT\t5\t1\t1\t1\t1\tsynced_ende_v1"
    )?;
    eval.flush()?;

    fs::write(dir.join("eval_rids.txt"), "e001\n")?;

    let schema = concat!(env!("CARGO_MANIFEST_DIR"), "/../../schema/synced_ende_v1.yaml");
    let config = format!(
        "input: input.tsv\n\
         eval_reference: eval_gold.tsv\n\
         blocklist: eval_rids.txt\n\
         schema: {}\n\
         output_dir: out\n\
         work_dir: work\n\
         injection:\n  seed: 42\n  eval_fraction: 0.2\n\
         repair:\n  max_rounds: 3\n",
        schema
    );
    fs::write(dir.join("build.yaml"), config)?;

    println!("✓ Wrote {} input rows, 1 frozen eval row and build.yaml", PAIRS.len() + 1);
    println!("\nRun the pipeline with:");
    println!("  cargo run --bin synced -- build --config {}", dir.join("build.yaml").display());

    Ok(())
}
