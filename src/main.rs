use std::{env, fs};

use neat_trainer::neat::{ActionSpace, Genome, NeatResult, Population, Settings, SinglePlayerArena};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use tracing::info;
use tracing_subscriber::EnvFilter;

const XOR_CASES: [([f64; 2], f64); 4] = [([0., 0.], 0.), ([0., 1.], 1.), ([1., 0.], 1.), ([1., 1.], 0.)];

struct XorArena;
impl SinglePlayerArena for XorArena {
    fn evaluate(&self, genome: &mut Genome) -> f64 {
        let error: f64 = XOR_CASES
            .iter()
            .map(|(inputs, expected)| {
                genome.clear_values();
                (genome.evaluate(inputs)[0] - expected).powi(2)
            })
            .sum();
        4. - error
    }
}

fn load_settings() -> NeatResult<Settings> {
    match env::args().nth(1) {
        Some(path) => {
            info!("loading settings from {}", path);
            let json = fs::read_to_string(&path)?;
            let mut settings = Settings::from_json(&json)?;
            settings.n_sensor_nodes = 2;
            settings.action_space = ActionSpace::continuous(1);
            settings.validate()?;
            Ok(settings)
        }
        None => Ok(Settings {
            n_organisms: 150,
            max_generations: 200,
            ..Settings::standard(2, ActionSpace::continuous(1))
        }),
    }
}

fn main() -> NeatResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("neat=info")))
        .init();

    let settings = load_settings()?;
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(2);
    let mut population = Population::init(&mut rng, settings)?;

    while !population.is_terminal() {
        population.evaluate_single_player(&XorArena);
        if population.next_generation(&mut rng).is_none() {
            break;
        }
        if population.best().map_or(false, |(_, fitness)| fitness > 3.9) {
            break;
        }
    }

    if let Some((genome, fitness)) = population.best() {
        let mut genome = genome.clone();
        info!(
            fitness,
            nodes = genome.n_nodes(),
            connections = genome.n_enabled_connections(),
            "best genome after {} generations",
            population.generation
        );
        for (inputs, expected) in XOR_CASES {
            genome.clear_values();
            let output = genome.evaluate(&inputs)[0];
            info!("{:?} -> {:.3} (expected {})", inputs, output, expected);
        }
    }
    Ok(())
}
