use rand::{SeedableRng, distr::Distribution, rngs::StdRng};
use rand_distr::{Binomial, Poisson};

use crate::{
    output::RenewalOutput,
    parameters::{Parameters, Population},
};

pub struct RenewalModel {}

impl RenewalModel {
    pub fn simulate(parameters: &Parameters) -> RenewalOutput {
        let mut output = RenewalOutput::new(parameters.sim_length);
        let mut incidence = parameters.seed_incidence.clone();
        let history = incidence.len();
        let mut cum_infected = parameters.prior_infections;
        let mut rng = StdRng::seed_from_u64(parameters.seed);
        for step in 0..parameters.sim_length {
            let now = history + step;
            let current_infectious: f64 = parameters
                .generation_interval_pmf
                .iter()
                .take(now)
                .enumerate()
                .map(|(lag, mass)| incidence[now - lag - 1] as f64 * mass)
                .sum();

            let infections = match parameters.population {
                Population::Finite(population) => {
                    let susceptible = population.saturating_sub(cum_infected);
                    let rt = parameters.r0 * susceptible as f64 / population.max(1) as f64;
                    let transmission_rate = rt * current_infectious;
                    if susceptible > 0 {
                        Binomial::new(
                            susceptible,
                            f64::min(transmission_rate / susceptible as f64, 1.0),
                        )
                        .map_or(0, |d| d.sample(&mut rng))
                    } else {
                        0
                    }
                }
                Population::Infinite => {
                    let transmission_rate = parameters.r0 * current_infectious;
                    // Poisson requires a positive rate
                    Poisson::new(transmission_rate).map_or(0, |d| d.sample(&mut rng) as u64)
                }
            };
            incidence.push(infections);
            cum_infected += infections;
            output.infection_incidence[step] = infections;
            output.cumulative_infections[step] = cum_infected;
            output.infectiousness[step] = current_infectious;
        }
        output
    }
}
