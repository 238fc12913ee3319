use anyhow::anyhow;
use channel_cli::config::{CliCommand, Config, GlobalOptions, IdCommand, SimulateCommand};
use channel_cli::identities::{default_identity_path, LocalIdentity, LocalIdentitySet};
use channel_cli::scenario::{Scenario, Simulation};
use clap::Parser;
use libchannel::crypto::KeySigner;
use libchannel::state::ChannelState;
use libchannel::storage::{ChannelStore, FileStore, MemoryStore};
use log::*;
use std::path::PathBuf;

#[tokio::main]
async fn main() {
    env_logger::init();
    let config: Config = Config::parse();
    let (global_options, command) = config.to_parts();

    let result = match command {
        CliCommand::Id(id_command) => exec_id_command(id_command, global_options),
        CliCommand::Simulate(cmd) => exec_simulation(cmd, global_options).await,
    };

    if let Err(err) = result {
        eprintln!("** Error ** \n {err}");
        std::process::exit(1);
    }
}

fn identity_path(options: &GlobalOptions) -> PathBuf {
    options.identity_file.clone().unwrap_or_else(default_identity_path)
}

fn exec_id_command(cmd: IdCommand, options: GlobalOptions) -> Result<(), anyhow::Error> {
    let path = identity_path(&options);
    let mut identities = LocalIdentitySet::load_or_default(&path)?;
    match cmd {
        IdCommand::Create { name } => {
            let identity = LocalIdentity::random(name);
            if identities.contains(&identity.name) {
                return Err(anyhow!("Identity {} already exists.", identity.name));
            }
            println!("Identity created: {identity}");
            identities.insert(identity);
            println!("Saving identities to {}", path.display());
            identities.save(&path)?;
        }
        IdCommand::List => {
            println!("{} local identities found.", identities.identities.len());
            for id in identities.identities.values() {
                println!("{id}");
            }
        }
        IdCommand::Delete { name } => match identities.remove(&name) {
            Some(identity) => {
                println!("Identity deleted: {identity}");
                identities.save(&path)?;
            }
            None => return Err(anyhow!("Identity {name} not found.")),
        },
    }
    Ok(())
}

fn signer_for(identities: &LocalIdentitySet, name: Option<&String>) -> Result<KeySigner, anyhow::Error> {
    match name {
        Some(name) => {
            identities.get(name).map(LocalIdentity::signer).ok_or_else(|| anyhow!("Identity {name} not found."))
        }
        None => Ok(KeySigner::random()),
    }
}

async fn exec_simulation(cmd: SimulateCommand, options: GlobalOptions) -> Result<(), anyhow::Error> {
    let scenario = Scenario::load(&cmd.scenario)?;
    info!("Loaded {} steps from {}", scenario.steps.len(), cmd.scenario.display());
    let identities = if cmd.alice.is_some() || cmd.bob.is_some() {
        LocalIdentitySet::load_or_default(identity_path(&options))?
    } else {
        LocalIdentitySet::default()
    };
    let alice = signer_for(&identities, cmd.alice.as_ref())?;
    let bob = signer_for(&identities, cmd.bob.as_ref())?;
    let state = match &cmd.store_dir {
        Some(dir) => {
            let alice_store = FileStore::new(dir.join("alice"))?;
            let bob_store = FileStore::new(dir.join("bob"))?;
            run(&scenario, (alice, alice_store), (bob, bob_store)).await?
        }
        None => run(&scenario, (alice, MemoryStore::new()), (bob, MemoryStore::new())).await?,
    };
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

async fn run<S: ChannelStore>(
    scenario: &Scenario,
    alice: (KeySigner, S),
    bob: (KeySigner, S),
) -> Result<ChannelState, anyhow::Error> {
    let mut simulation = Simulation::new(alice, bob, scenario.network.chain_id);
    Ok(simulation.run(scenario).await?)
}
